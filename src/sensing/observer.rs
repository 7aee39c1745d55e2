//! Focused-window identification.

use std::{sync::Mutex, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::command::run_command;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(3);

const BROWSERS: &[&str] = &[
    "google chrome",
    "chrome",
    "chromium",
    "firefox",
    "safari",
    "arc",
    "brave browser",
    "brave",
    "microsoft edge",
    "msedge",
    "opera",
    "vivaldi",
];

#[async_trait]
pub trait WindowObserver: Send + Sync {
    /// Stable identifier of the focused window, `None` when nothing is
    /// focused.
    async fn current_window_id(&self) -> Result<Option<String>>;
}

/// Asks the desktop for the focused window through helper commands.
///
/// The title command prints either `App<TAB>Title` or just the title. In the
/// latter case the owning app is looked up from the pid command's output.
pub struct CommandWindowObserver {
    title_command: Vec<String>,
    pid_command: Option<Vec<String>>,
    system: Mutex<System>,
}

impl CommandWindowObserver {
    pub fn new(title_command: Vec<String>, pid_command: Option<Vec<String>>) -> Self {
        Self {
            title_command,
            pid_command,
            system: Mutex::new(System::new()),
        }
    }

    /// Platform default: `osascript` on macOS, `xdotool` elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(target_os = "macos") {
            let script = [
                "tell application \"System Events\" to set p to first application process whose frontmost is true",
                "set n to name of p",
                "try",
                "set t to name of front window of p",
                "on error",
                "set t to \"\"",
                "end try",
                "return n & tab & t",
            ];
            let mut argv = vec!["osascript".to_string()];
            for line in script {
                argv.push("-e".to_string());
                argv.push(line.to_string());
            }
            Self::new(argv, None)
        } else {
            Self::new(
                to_argv(&["xdotool", "getactivewindow", "getwindowname"]),
                Some(to_argv(&["xdotool", "getactivewindow", "getwindowpid"])),
            )
        }
    }

    async fn owning_app(&self) -> Result<Option<String>> {
        let Some(pid_command) = &self.pid_command else {
            return Ok(None);
        };
        let raw = run_command(pid_command, None, COMMAND_TIMEOUT).await?;
        let pid: u32 = String::from_utf8_lossy(&raw)
            .trim()
            .parse()
            .context("window pid is not a number")?;
        Ok(self.process_name(pid))
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), ProcessRefreshKind::new());
        system.process(pid).map(|process| {
            let name = process.name().to_string_lossy();
            name.trim_end_matches(".exe").to_string()
        })
    }
}

#[async_trait]
impl WindowObserver for CommandWindowObserver {
    async fn current_window_id(&self) -> Result<Option<String>> {
        let raw = run_command(&self.title_command, None, COMMAND_TIMEOUT)
            .await
            .context("failed to query focused window")?;
        let line = String::from_utf8_lossy(&raw).trim().to_string();
        if line.is_empty() {
            return Ok(None);
        }

        let (app, title) = match line.split_once('\t') {
            Some((app, title)) => (app.to_string(), title.to_string()),
            None => {
                let app = match self.owning_app().await {
                    Ok(app) => app.unwrap_or_default(),
                    Err(err) => {
                        log::debug!("could not resolve window owner: {err:#}");
                        String::new()
                    }
                };
                (app, line)
            }
        };

        Ok(window_identifier(&app, &title))
    }
}

/// Builds the human-readable identifier for a window.
///
/// Browsers are keyed by site so tabs on the same site share an entry; other
/// apps by their window title.
pub fn window_identifier(app: &str, title: &str) -> Option<String> {
    let app = title_case_app(app.trim());
    let title = title.trim();

    match (app.is_empty(), title.is_empty()) {
        (true, true) => None,
        (true, false) => Some(title.to_string()),
        (false, true) => Some(app),
        (false, false) if is_browser(&app) => Some(format!("{app} - {}", browser_site(title))),
        (false, false) => {
            let title = title
                .strip_suffix(app.as_str())
                .map(|rest| rest.trim_end_matches([' ', '-', '—']).trim())
                .filter(|rest| !rest.is_empty())
                .unwrap_or(title);
            Some(format!("{app} - {title}"))
        }
    }
}

fn is_browser(app: &str) -> bool {
    let lower = app.to_lowercase();
    BROWSERS.iter().any(|browser| lower == *browser)
}

/// Picks the segment of a browser title that names the site: the last
/// domain-looking segment, else the first segment.
fn browser_site(title: &str) -> String {
    let segments: Vec<&str> = title
        .split(" - ")
        .flat_map(|segment| segment.split(" — "))
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();

    segments
        .iter()
        .rev()
        .find(|segment| looks_like_domain(segment))
        .or_else(|| segments.first())
        .map(|segment| segment.to_string())
        .unwrap_or_else(|| title.to_string())
}

fn looks_like_domain(segment: &str) -> bool {
    !segment.contains(char::is_whitespace)
        && segment.contains('.')
        && segment
            .rsplit('.')
            .next()
            .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
}

fn title_case_app(app: &str) -> String {
    let mut chars = app.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn to_argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_windows_keyed_by_site() {
        assert_eq!(
            window_identifier("Google Chrome", "Pull requests - github.com - Google Chrome"),
            Some("Google Chrome - github.com".to_string())
        );
        assert_eq!(
            window_identifier("firefox", "Rust Book — Mozilla Firefox"),
            Some("Firefox - Rust Book".to_string())
        );
    }

    #[test]
    fn test_app_windows_keyed_by_title() {
        assert_eq!(
            window_identifier("Code", "main.rs - studylens - Code"),
            Some("Code - main.rs - studylens".to_string())
        );
        assert_eq!(window_identifier("Spotify", ""), Some("Spotify".to_string()));
        assert_eq!(window_identifier("", "Untitled"), Some("Untitled".to_string()));
        assert_eq!(window_identifier("  ", "  "), None);
    }

    #[test]
    fn test_domain_detection() {
        assert!(looks_like_domain("github.com"));
        assert!(looks_like_domain("docs.rs"));
        assert!(!looks_like_domain("v1.2"));
        assert!(!looks_like_domain("Chapter 1. Intro"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_observer_parses_tab_separated_output() {
        let observer = CommandWindowObserver::new(
            to_argv(&["printf", "Safari\\tLecture 3 - mit.edu"]),
            None,
        );
        assert_eq!(
            observer.current_window_id().await.unwrap(),
            Some("Safari - mit.edu".to_string())
        );

        let empty = CommandWindowObserver::new(to_argv(&["true"]), None);
        assert_eq!(empty.current_window_id().await.unwrap(), None);
    }
}
