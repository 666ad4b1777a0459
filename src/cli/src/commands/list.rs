//! `a3s-model list` command.

use a3s_model_runtime::ManifestEntry;
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct ListArgs {
    /// Only show model names (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: ListArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store()?;
    let entries = store.list_manifests()?;

    if args.quiet {
        for entry in &entries {
            println!("{}", entry.path.short_tagname());
        }
        return Ok(());
    }

    let now = chrono::Utc::now();
    println!("{}", output::model_table(entries.iter().map(|e| row(e, now))));
    Ok(())
}

fn row(entry: &ManifestEntry, now: chrono::DateTime<chrono::Utc>) -> Vec<String> {
    let name = entry
        .path
        .short_tagname()
        .rsplit_once(':')
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| entry.path.name.clone());
    vec![
        name,
        entry.path.tag.clone(),
        output::human_size(entry.content_size),
        output::age(&entry.modified, now),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use a3s_model_runtime::ModelPath;

    fn entry(name: &str) -> ManifestEntry {
        ManifestEntry {
            path: ModelPath::parse(name).unwrap(),
            size: 512,
            content_size: 3 * 1024 * 1024,
            modified: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_row_default_registry() {
        let e = entry("llama:v1");
        let cells = row(&e, e.modified + chrono::Duration::minutes(2));
        assert_eq!(cells[0], "llama");
        assert_eq!(cells[1], "v1");
        assert_eq!(cells[2], "3.0 MB");
        assert_eq!(cells[3], "2 minutes ago");
    }

    #[test]
    fn test_row_custom_registry() {
        let cells = row(&entry("registry.example.com/team/llama"), chrono::Utc::now());
        assert_eq!(cells[0], "registry.example.com/team/llama");
        assert_eq!(cells[1], "latest");
    }
}
