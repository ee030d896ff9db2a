use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Loads system prompts keyed by language code from `<language>.md` files.
///
/// A missing directory yields no prompts. Empty files are skipped so they
/// never shadow the default prompt.
pub fn load_language_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    if !dir_path.exists() {
        tracing::warn!(
            "Prompts directory {} not found, using the default prompt only",
            dir_path.display()
        );
        return Ok(prompts);
    }

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let language = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_lowercase();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
            let content = content.trim();
            if content.is_empty() {
                tracing::warn!("Skipping empty prompt file {}", path.display());
                continue;
            }

            tracing::debug!("Loaded prompt for language '{}'", language);
            prompts.insert(language, content.to_string());
        }
    }

    Ok(prompts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_load_language_prompts() -> Result<()> {
        // Arrange
        let dir = tempdir()?;
        let dir_path = dir.path();

        let mut sq = File::create(dir_path.join("sq.md"))?;
        writeln!(sq, "Ti je një asistent i dobishëm.")?;

        let mut en = File::create(dir_path.join("EN.md"))?;
        writeln!(en, "You are a helpful assistant.")?;

        File::create(dir_path.join("de.md"))?;

        let mut ignored = File::create(dir_path.join("notes.txt"))?;
        writeln!(ignored, "not a prompt")?;
        fs::create_dir(dir_path.join("it.md"))?;

        // Act
        let prompts = load_language_prompts(dir_path)?;

        // Assert
        assert_eq!(prompts.len(), 2, "Only non-empty .md files are prompts");
        assert_eq!(prompts["sq"], "Ti je një asistent i dobishëm.");
        assert_eq!(prompts["en"], "You are a helpful assistant.");
        assert!(!prompts.contains_key("de"));
        assert!(!prompts.contains_key("notes"));

        Ok(())
    }

    #[test]
    fn test_missing_directory_yields_no_prompts() -> Result<()> {
        let prompts = load_language_prompts(Path::new("nonexistent_dir_for_testing_prompts"))?;
        assert!(prompts.is_empty());
        Ok(())
    }

    #[test]
    fn test_path_that_is_a_file_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let file_path = dir.path().join("prompts");
        File::create(&file_path)?;

        assert!(load_language_prompts(&file_path).is_err());
        Ok(())
    }
}
