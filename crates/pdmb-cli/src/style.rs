use std::env;

use color_eyre::owo_colors::OwoColorize;
use pdmb_core::CommandStatus;

pub struct Style {
    enabled: bool,
}

impl Style {
    pub fn new(force_no_color: bool, is_tty: bool) -> Self {
        let env_no_color = env::var_os("NO_COLOR").is_some();
        Self {
            enabled: !(force_no_color || env_no_color) && is_tty,
        }
    }

    pub fn status(&self, status: &CommandStatus, text: &str) -> String {
        let (symbol, tone) = match status {
            CommandStatus::Ok => ("✔", Tone::Green),
            CommandStatus::UserError => ("✗", Tone::Yellow),
            CommandStatus::Failure => ("✖", Tone::Red),
        };
        self.paint(&format!("{symbol} {text}"), tone)
    }

    /// `Built wheel <path> (N bytes)` with the path highlighted.
    pub fn built(&self, target: &str, path: &str, bytes: u64) -> String {
        if !self.enabled {
            return format!("Built {target} {path} ({bytes} bytes)");
        }
        format!(
            "{} {target} {} {}",
            "Built".green().bold(),
            path.cyan().underline(),
            format!("({bytes} bytes)").dimmed()
        )
    }

    pub fn warning(&self, text: &str) -> String {
        self.paint(&format!("warning: {text}"), Tone::Yellow)
    }

    pub fn dimmed(&self, text: &str) -> String {
        if !self.enabled {
            return text.to_string();
        }
        text.dimmed().to_string()
    }

    fn paint(&self, text: &str, tone: Tone) -> String {
        if !self.enabled {
            return text.to_string();
        }
        match tone {
            Tone::Green => text.green().bold().to_string(),
            Tone::Yellow => text.yellow().bold().to_string(),
            Tone::Red => text.red().bold().to_string(),
        }
    }
}

enum Tone {
    Green,
    Yellow,
    Red,
}
