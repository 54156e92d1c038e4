//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use serde::Serialize;

use tally_core::{Item, LogEntry, Space};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print a value as pretty JSON
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Failed to encode output: {}", e),
        }
    }

    /// Print a single space with its items
    pub fn print_space(&self, space: &Space, active: bool) {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", space.id);
                println!("Name:     {}{}", space.name, if active { " (active)" } else { "" });
                println!("Owner:    {}", space.owner_id);
                if let Some(role) = space.shared_role {
                    println!("Role:     {}", role);
                }
                if !space.collaborators.is_empty() {
                    let people: Vec<String> = space
                        .collaborators
                        .iter()
                        .map(|(user, role)| format!("{} ({})", user, role))
                        .collect();
                    println!("Shared:   {}", people.join(", "));
                }
                if !space.categories.is_empty() {
                    println!("Groups:   {}", space.categories.join(", "));
                }
                println!(
                    "Progress: {}/{} complete",
                    space.completed_count(),
                    space.items.len()
                );
                println!("Status:   {}", sync_label(space));

                if !space.items.is_empty() {
                    println!();
                    self.print_items(&space.items);
                }
            }
            OutputFormat::Json => self.json(space),
            OutputFormat::Quiet => println!("{}", space.id),
        }
    }

    /// Print a list of spaces
    pub fn print_spaces(&self, spaces: &[Space], active: Option<&str>) {
        match self.format {
            OutputFormat::Human => {
                if spaces.is_empty() {
                    println!("No spaces yet.");
                    return;
                }
                for space in spaces {
                    let marker = if active == Some(space.id.as_str()) { "*" } else { " " };
                    let shared = match space.shared_role {
                        Some(role) => format!(" [{} of {}]", role, space.owner_id),
                        None => String::new(),
                    };
                    println!(
                        "{} {} | {}{} | {}/{} | {}",
                        marker,
                        short_id(&space.id),
                        truncate(&space.name, 30),
                        shared,
                        space.completed_count(),
                        space.items.len(),
                        sync_label(space)
                    );
                }
                println!("\n{} space(s)", spaces.len());
            }
            OutputFormat::Json => self.json(spaces),
            OutputFormat::Quiet => {
                for space in spaces {
                    println!("{}", space.id);
                }
            }
        }
    }

    /// Print the items of a space
    pub fn print_items(&self, items: &[Item]) {
        match self.format {
            OutputFormat::Human => {
                if items.is_empty() {
                    println!("No items in this space.");
                    return;
                }
                for item in items {
                    let check = if item.is_complete() { "x" } else { " " };
                    let category = item
                        .category
                        .as_deref()
                        .map(|c| format!(" ({})", c))
                        .unwrap_or_default();
                    println!(
                        "[{}] {} | {}{} | {}/{}",
                        check,
                        &item.id.to_string()[..8],
                        truncate(&item.name, 40),
                        category,
                        item.progress,
                        item.target
                    );
                }
                println!("\n{} item(s)", items.len());
            }
            OutputFormat::Json => self.json(items),
            OutputFormat::Quiet => {
                for item in items {
                    println!("{}", item.id);
                }
            }
        }
    }

    /// Print sync log entries, oldest first
    pub fn print_log(&self, entries: &[LogEntry]) {
        match self.format {
            OutputFormat::Human => {
                for entry in entries {
                    println!(
                        "{} {:<5} {}",
                        entry.at.format("%H:%M:%S"),
                        format!("{:?}", entry.level).to_lowercase(),
                        entry.message
                    );
                }
            }
            OutputFormat::Json => self.json(entries),
            OutputFormat::Quiet => {}
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// First eight characters of an identifier
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn sync_label(space: &Space) -> &'static str {
    if space.meta.is_dirty() && space.is_editable() {
        "unsynced"
    } else {
        "synced"
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 8), "ééééé...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_sync_label() {
        let mut space = Space::new("alice", "Shells");
        assert_eq!(sync_label(&space), "unsynced");

        space.meta.local_modified = Some(5);
        space.meta.last_synced_local = Some(5);
        assert_eq!(sync_label(&space), "synced");
    }
}
