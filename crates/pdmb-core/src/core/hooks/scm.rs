//! Versions derived from git or mercurial tags.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use once_cell::sync::Lazy;
use pdmb_domain::BackendError;
use pep440_rs::Version;
use regex::Regex;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::process::ToolCommand;
use crate::settings::EnvSnapshot;

const DEFAULT_TAG_REGEX: &str =
    r"^(?:[\w-]+-)?(?P<version>[vV]?\d+(?:\.\d+){0,2}[^\+]*)(?:\+.*)?$";

static DEFAULT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_TAG_REGEX).expect("default tag regex is valid"));
static TRAILING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?)(\d+)$").expect("trailing number regex is valid"));

pub(crate) struct ScmConfig {
    tag_regex: Regex,
    tag_filter: Option<String>,
}

impl ScmConfig {
    /// A user-supplied `tag_regex` is anchored at the start of the tag.
    pub(crate) fn new(tag_regex: Option<&str>, tag_filter: Option<&str>) -> Result<Self> {
        let tag_regex = match tag_regex {
            Some(pattern) => Regex::new(&format!("^(?:{pattern})")).map_err(|err| {
                BackendError::config(format!("Invalid tag_regex {pattern:?}: {err}"))
            })?,
            None => DEFAULT_TAG.clone(),
        };
        Ok(Self {
            tag_regex,
            tag_filter: tag_filter.map(ToString::to_string),
        })
    }
}

/// Where the working tree stands relative to its latest tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScmVersion {
    pub(crate) version: Version,
    pub(crate) distance: Option<u64>,
    pub(crate) dirty: bool,
    pub(crate) node: Option<String>,
    pub(crate) branch: Option<String>,
}

/// Tries git, then mercurial. `None` when neither knows the project.
pub(crate) fn get_version_from_scm(
    root: &Path,
    config: &ScmConfig,
    env: &EnvSnapshot,
    warnings: &mut Vec<String>,
) -> Result<Option<String>> {
    let runner = ScmRunner::new(env);
    if let Some(version) = git_parse_version(root, config, &runner, warnings)? {
        return Ok(Some(format_version(&version, OffsetDateTime::now_utc())?));
    }
    if let Some(version) = hg_parse_version(root, config, &runner, warnings)? {
        return Ok(Some(format_version(&version, OffsetDateTime::now_utc())?));
    }
    Ok(None)
}

struct ScmOutput {
    code: i32,
    stdout: String,
}

impl ScmOutput {
    fn ok(&self) -> bool {
        self.code == 0
    }
}

/// Runs VCS commands with a predictable locale and no inherited `GIT_*`
/// overrides that would point them at another repository.
struct ScmRunner {
    envs: Vec<(String, String)>,
}

impl ScmRunner {
    fn new(env: &EnvSnapshot) -> Self {
        let mut envs: Vec<(String, String)> = env
            .vars()
            .filter(|(key, _)| {
                !key.starts_with("GIT_")
                    || matches!(*key, "GIT_EXEC_PATH" | "GIT_SSH" | "GIT_SSH_COMMAND")
            })
            .filter(|(key, _)| !matches!(*key, "LC_ALL" | "LANG" | "HGPLAIN"))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        envs.push(("LC_ALL".into(), "C".into()));
        envs.push(("LANG".into(), String::new()));
        envs.push(("HGPLAIN".into(), "1".into()));
        Self { envs }
    }

    fn run(&self, program: &str, args: &[&str], cwd: &Path) -> Result<ScmOutput> {
        let output = ToolCommand::new(program, cwd)
            .args(args.iter().copied())
            .isolated_env(&self.envs)
            .run()?;
        Ok(ScmOutput {
            code: output.code,
            stdout: output.stdout.trim().to_string(),
        })
    }
}

fn find_program(name: &str) -> Option<String> {
    which::which(name)
        .ok()
        .map(|path| path.to_string_lossy().into_owned())
}

fn git_parse_version(
    root: &Path,
    config: &ScmConfig,
    runner: &ScmRunner,
    warnings: &mut Vec<String>,
) -> Result<Option<ScmVersion>> {
    let Some(git) = find_program("git") else {
        return Ok(None);
    };
    let toplevel = runner.run(&git, &["rev-parse", "--show-toplevel"], root)?;
    if !toplevel.ok() || toplevel.stdout.is_empty() {
        return Ok(None);
    }
    let repo = PathBuf::from(&toplevel.stdout);
    if repo.join(".git/shallow").is_file() {
        warnings.push(format!("{:?} is shallow and may cause errors", toplevel.stdout));
    }

    let filter = config.tag_filter.as_deref().unwrap_or("*.*");
    let describe = runner.run(
        &git,
        &["describe", "--dirty", "--tags", "--long", "--match", filter],
        &repo,
    )?;
    let branch_output = runner.run(&git, &["rev-parse", "--abbrev-ref", "HEAD"], &repo)?;
    let branch = branch_output.ok().then_some(branch_output.stdout);

    if !describe.ok() {
        let dirty = !runner
            .run(&git, &["status", "--porcelain", "--untracked-files=no"], &repo)?
            .stdout
            .is_empty();
        let head = runner.run(&git, &["rev-parse", "--verify", "--quiet", "HEAD"], &repo)?;
        if !head.ok() {
            return meta(config, "0.0", Some(0), dirty, None, None, warnings).map(Some);
        }
        let node: String = head.stdout.chars().take(7).collect();
        let commits = runner.run(&git, &["rev-list", "HEAD"], &repo)?;
        let distance = commits.stdout.matches('\n').count() as u64 + 1;
        return meta(
            config,
            "0.0",
            Some(distance),
            dirty,
            Some(format!("g{node}")),
            branch,
            warnings,
        )
        .map(Some);
    }

    let (tag, number, node, dirty) = parse_git_describe(&describe.stdout)?;
    let distance = (number > 0).then_some(number);
    meta(config, &tag, distance, dirty, Some(node), branch, warnings).map(Some)
}

/// Splits `v1.5.0-3-g4060507[-dirty]` into tag, distance, node and dirtiness.
fn parse_git_describe(output: &str) -> Result<(String, u64, String, bool)> {
    let (output, dirty) = match output.strip_suffix("-dirty") {
        Some(stripped) => (stripped, true),
        None => (output, false),
    };
    let mut parts = output.rsplitn(3, '-');
    let (Some(node), Some(number), Some(tag)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(BackendError::config(format!("unexpected output of git describe: {output:?}")).into());
    };
    let number = number.parse::<u64>().map_err(|_| {
        BackendError::config(format!("unexpected output of git describe: {output:?}"))
    })?;
    Ok((tag.to_string(), number, node.to_string(), dirty))
}

fn hg_distance_revset(tag: Option<&str>) -> String {
    let rev = tag.map_or_else(|| "null".to_string(), |tag| format!("tag('{tag}')"));
    format!(
        "(branch(.) and {rev}::. and (merge() or file('re:^(?!\\.hgtags).*$')) and not {rev})"
    )
}

fn hg_parse_version(
    root: &Path,
    config: &ScmConfig,
    runner: &ScmRunner,
    warnings: &mut Vec<String>,
) -> Result<Option<ScmVersion>> {
    let Some(hg) = find_program("hg") else {
        return Ok(None);
    };
    let filter = config.tag_filter.as_deref().unwrap_or("\\.");
    let template = format!("{{latesttag(r're:{filter}')}}-{{node|short}}-{{branch}}");
    let log = runner.run(&hg, &["log", "-r", ".", "--template", &template], root)?;
    if !log.ok() {
        return Ok(None);
    }
    let mut parts = log.stdout.rsplitn(3, '-');
    let (Some(branch), Some(node), Some(tag)) = (parts.next(), parts.next(), parts.next()) else {
        return Ok(None);
    };
    let tag = (tag != "null").then_some(tag);

    let dirty = runner.run(&hg, &["id", "-i"], root)?.stdout.ends_with('+');
    let revset = hg_distance_revset(tag);
    let distance = runner
        .run(&hg, &["log", "-q", "-r", &revset], root)?
        .stdout
        .lines()
        .count() as u64;
    let tag = tag.unwrap_or("0.0");

    let has_commits = if tag == "0.0" {
        true
    } else {
        let commits = runner.run(
            &hg,
            &["log", "-r", &hg_distance_revset(Some(tag)), "--template", "{node|short}"],
            root,
        )?;
        !commits.stdout.is_empty()
    };
    if has_commits || dirty {
        let distance = (distance > 0).then_some(distance);
        return meta(
            config,
            tag,
            distance,
            dirty,
            Some(node.to_string()),
            Some(branch.to_string()),
            warnings,
        )
        .map(Some);
    }
    meta(config, tag, None, false, None, None, warnings).map(Some)
}

fn meta(
    config: &ScmConfig,
    tag: &str,
    distance: Option<u64>,
    dirty: bool,
    node: Option<String>,
    branch: Option<String>,
    warnings: &mut Vec<String>,
) -> Result<ScmVersion> {
    Ok(ScmVersion {
        version: tag_to_version(config, tag, warnings)?,
        distance,
        dirty,
        node,
        branch,
    })
}

/// Extracts the version part of a tag such as `release-v1.2.0`.
pub(crate) fn tag_to_version(
    config: &ScmConfig,
    tag: &str,
    warnings: &mut Vec<String>,
) -> Result<Version> {
    let regex = &config.tag_regex;
    let found = regex.captures(tag).and_then(|captures| {
        let group = if regex.captures_len() == 2 {
            captures.get(1)
        } else {
            captures.name("version")
        };
        group.map(|group| (group, captures.get(0).map_or(0, |whole| whole.end())))
    });
    let Some((group, whole_end)) = found.filter(|(group, _)| !group.as_str().is_empty()) else {
        warnings.push(format!("tag {tag:?} no version found"));
        return parse_version("0.0.0", tag);
    };
    let suffix = &tag[group.end()..whole_end];
    if !suffix.is_empty() {
        warnings.push(format!("tag {tag:?} will be stripped of its suffix {suffix:?}"));
    }
    let raw = group.as_str();
    parse_version(raw.strip_prefix(['v', 'V']).unwrap_or(raw), tag)
}

fn parse_version(raw: &str, tag: &str) -> Result<Version> {
    Version::from_str(raw).map_err(|err| {
        BackendError::config(format!("Invalid version {raw:?} in tag {tag:?}: {err}")).into()
    })
}

/// The next release after `version`: drop the local part, then either drop
/// a `.dev0` tail or bump the last number.
pub(crate) fn guess_next_version(version: &Version) -> Result<String> {
    let rendered = version.to_string();
    let public = rendered.split_once('+').map_or(rendered.as_str(), |(public, _)| public);
    if let Some((prefix, tail)) = public.rsplit_once(".dev") {
        if tail != "0" {
            return Err(BackendError::config(format!(
                "own dev numbers are unsupported, got {public:?}"
            ))
            .into());
        }
        return Ok(prefix.to_string());
    }
    let captures = TRAILING_NUMBER.captures(public).ok_or_else(|| {
        BackendError::config(format!("version {public:?} does not end with a number"))
    })?;
    let number: u64 = captures[2]
        .parse()
        .map_err(|_| BackendError::config(format!("version {public:?} has an oversized number")))?;
    Ok(format!("{}{}", &captures[1], number + 1))
}

pub(crate) fn format_version(version: &ScmVersion, now: OffsetDateTime) -> Result<String> {
    let main = match version.distance {
        None => version.version.to_string(),
        Some(distance) => format!("{}.dev{distance}", guess_next_version(&version.version)?),
    };
    let date = now
        .format(format_description!("[year][month][day]"))
        .map_err(|err| anyhow::anyhow!("failed to format build date: {err}"))?;
    let local = match (version.distance, version.node.as_deref(), version.dirty) {
        (Some(_), Some(node), false) => format!("+{node}"),
        (Some(_), Some(node), true) => format!("+{node}.d{date}"),
        (_, _, true) => format!("+d{date}"),
        (_, _, false) => String::new(),
    };
    Ok(format!("{main}{local}"))
}
