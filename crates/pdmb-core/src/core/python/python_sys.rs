use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::from_slice;
use which::which;

use crate::settings::EnvSnapshot;

const TAGS_SCRIPT: &str = r#"import json, sys, sysconfig
major, minor = sys.version_info[:2]
name = sys.implementation.name
short = {"cpython": "cp", "pypy": "pp", "ironpython": "ip", "jython": "jy"}.get(name, name)

def load_tags():
    try:
        from packaging import tags
        return tags
    except Exception:
        pass
    try:
        from pip._vendor.packaging import tags
        return tags
    except Exception:
        return None

tags = load_tags()
supported = list(tags.sys_tags()) if tags is not None else []
if supported:
    abi = str(supported[0].abi).lower()
else:
    soabi = sysconfig.get_config_var("SOABI") or ""
    parts = soabi.split("-")
    abi = f"cp{parts[1]}" if name == "cpython" and len(parts) > 1 else "none"

data = {
    "interpreter": f"{short}{major}{minor}",
    "abi": abi,
    "platform": sysconfig.get_platform(),
    "is_cpython": name == "cpython",
    "major": major,
    "tags": [
        {"python": str(tag.interpreter).lower(), "abi": str(tag.abi).lower()}
        for tag in supported
    ],
}
print(json.dumps(data))
"#;

/// Access to the Python interpreter a build runs against.
pub trait InterpreterInfo {
    /// Path of the interpreter executable.
    fn executable(&self) -> Result<String>;

    /// Compatibility tag facts of the interpreter.
    fn tags(&self) -> Result<InterpreterTags>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterpreterTags {
    /// Interpreter tag such as `cp311`.
    pub interpreter: String,
    pub abi: String,
    /// Raw `sysconfig.get_platform()` value.
    pub platform: String,
    pub is_cpython: bool,
    pub major: u32,
    pub supported: Vec<InterpreterSupportedTag>,
}

impl InterpreterTags {
    /// Whether `python-abi` is installable on this interpreter.
    ///
    /// Without `packaging` the interpreter cannot list its tags; then only
    /// its own `{interpreter}-{abi}` pair and CPython 3 `abi3` are accepted.
    #[must_use]
    pub fn supports(&self, python: &str, abi: &str) -> bool {
        if self.supported.is_empty() {
            return (python == self.interpreter && abi == self.abi)
                || (abi == "abi3" && self.is_cpython && self.major == 3 && python.starts_with("cp3"));
        }
        self.supported
            .iter()
            .any(|tag| tag.python == python && tag.abi == abi)
    }

    pub(crate) fn knows_supported_tags(&self) -> bool {
        !self.supported.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct InterpreterSupportedTag {
    pub python: String,
    pub abi: String,
}

/// The interpreter found through `PDMB_PYTHON` or on `PATH`.
#[derive(Debug, Default)]
pub struct SystemInterpreter {
    explicit: Option<String>,
    tags: OnceCell<InterpreterTags>,
}

impl SystemInterpreter {
    pub fn from_env(env: &EnvSnapshot) -> Self {
        Self {
            explicit: env.var("PDMB_PYTHON").map(ToString::to_string),
            tags: OnceCell::new(),
        }
    }
}

impl InterpreterInfo for SystemInterpreter {
    fn executable(&self) -> Result<String> {
        if let Some(explicit) = &self.explicit {
            return Ok(explicit.clone());
        }
        for candidate in ["python3", "python"] {
            if let Ok(path) = which(candidate) {
                return path
                    .into_os_string()
                    .into_string()
                    .map_err(|_| anyhow!("non-utf8 path"));
            }
        }
        bail!("no python interpreter found; set PDMB_PYTHON")
    }

    fn tags(&self) -> Result<InterpreterTags> {
        self.tags
            .get_or_try_init(|| {
                let python = self.executable()?;
                let payload: TagsPayload = query_python(&python, TAGS_SCRIPT, "interpreter tags")?;
                Ok::<_, anyhow::Error>(InterpreterTags {
                    interpreter: payload.interpreter,
                    abi: payload.abi,
                    platform: payload.platform,
                    is_cpython: payload.is_cpython,
                    major: payload.major,
                    supported: payload.tags,
                })
            })
            .cloned()
    }
}

fn query_python<T>(python: &str, script: &str, guide: &str) -> Result<T>
where
    T: DeserializeOwned,
{
    let cmd = Command::new(python)
        .arg("-c")
        .arg(script)
        .output()
        .with_context(|| format!("failed to query {guide} via {python}"))?;
    if !cmd.status.success() {
        let stderr = String::from_utf8_lossy(&cmd.stderr);
        bail!("python {guide} query failed: {stderr}");
    }
    from_slice(&cmd.stdout).context(format!("invalid {guide} payload"))
}

#[derive(Deserialize)]
struct TagsPayload {
    interpreter: String,
    abi: String,
    platform: String,
    is_cpython: bool,
    major: u32,
    #[serde(default)]
    tags: Vec<InterpreterSupportedTag>,
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A fixed CPython 3.11 on linux x86_64.
    #[derive(Debug, Clone)]
    pub(crate) struct StubInterpreter {
        pub(crate) tags: InterpreterTags,
    }

    impl Default for StubInterpreter {
        fn default() -> Self {
            Self {
                tags: InterpreterTags {
                    interpreter: "cp311".into(),
                    abi: "cp311".into(),
                    platform: "linux-x86_64".into(),
                    is_cpython: true,
                    major: 3,
                    supported: [("cp311", "cp311"), ("cp311", "abi3"), ("cp311", "none"), ("py3", "none")]
                        .iter()
                        .map(|(python, abi)| InterpreterSupportedTag {
                            python: (*python).to_string(),
                            abi: (*abi).to_string(),
                        })
                        .collect(),
                },
            }
        }
    }

    impl InterpreterInfo for StubInterpreter {
        fn executable(&self) -> Result<String> {
            Ok("python3".to_string())
        }

        fn tags(&self) -> Result<InterpreterTags> {
            Ok(self.tags.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_interpreter_wins() -> Result<()> {
        let env = EnvSnapshot::testing(&[("PDMB_PYTHON", "/opt/python/bin/python3.12")]);
        let interpreter = SystemInterpreter::from_env(&env);
        assert_eq!(interpreter.executable()?, "/opt/python/bin/python3.12");
        Ok(())
    }

    #[test]
    fn supported_pairs_ignore_platform() {
        let tags = testing::StubInterpreter::default().tags;
        assert!(tags.supports("cp311", "abi3"));
        assert!(!tags.supports("cp38", "abi3"));
    }

    #[test]
    fn unknown_tag_list_accepts_own_pair_and_abi3() {
        let mut tags = testing::StubInterpreter::default().tags;
        tags.supported.clear();
        assert!(tags.supports("cp311", "cp311"));
        assert!(tags.supports("cp38", "abi3"));
        assert!(!tags.supports("cp27", "cp311"));
        assert!(!tags.supports("cp311", "cp310"));

        tags.is_cpython = false;
        assert!(!tags.supports("cp38", "abi3"));
    }
}
