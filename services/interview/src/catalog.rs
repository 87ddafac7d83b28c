use anyhow::{Context, Result};
use async_trait::async_trait;
use interview_core::SessionError;
use interview_core::collaborators::MediaLookup;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const FALLBACK_LANGUAGE: &str = "en";

/// Named system clips per language, loaded from `<lang>.json` files.
#[derive(Debug, Default)]
pub struct MediaCatalog {
    languages: HashMap<String, HashMap<String, String>>,
}

impl MediaCatalog {
    pub fn load(dir_path: &Path) -> Result<Self> {
        let mut languages = HashMap::new();

        for entry in fs::read_dir(dir_path)
            .with_context(|| format!("Failed to read media catalog directory: {}", dir_path.display()))?
        {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("json") {
                let language = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("Could not get file stem for catalog file")?
                    .to_string();

                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
                let clips: HashMap<String, String> = serde_json::from_str(&content)
                    .with_context(|| format!("Invalid catalog file: {}", path.display()))?;

                languages.insert(language, clips);
            }
        }

        Ok(Self { languages })
    }

    pub fn language_count(&self) -> usize {
        self.languages.len()
    }

    /// Looks `name` up for `language`, then in the English catalog.
    pub fn lookup(&self, name: &str, language: &str) -> Option<&str> {
        [language, FALLBACK_LANGUAGE]
            .into_iter()
            .filter_map(|lang| self.languages.get(lang))
            .find_map(|clips| clips.get(name))
            .map(String::as_str)
    }
}

#[async_trait]
impl MediaLookup for MediaCatalog {
    async fn resolve(&self, name: &str, language: &str) -> Result<String> {
        self.lookup(name, language)
            .map(str::to_string)
            .ok_or_else(|| {
                SessionError::MediaNotFound {
                    name: name.to_string(),
                    language: language.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_catalogs_successfully() -> Result<()> {
        // 1. Arrange: one catalog per language plus files that must be ignored.
        let dir = tempdir()?;
        let dir_path = dir.path();

        let mut en = File::create(dir_path.join("en.json"))?;
        writeln!(en, r#"{{"idle_listen": "https://cdn/en/idle.mp4", "intro_en_1": "https://cdn/en/intro1.mp4"}}"#)?;
        let mut fr = File::create(dir_path.join("fr.json"))?;
        writeln!(fr, r#"{{"intro_fr_1": "https://cdn/fr/intro1.mp4"}}"#)?;
        let mut notes = File::create(dir_path.join("notes.txt"))?;
        writeln!(notes, "not a catalog")?;
        std::fs::create_dir(dir_path.join("subdir"))?;

        // 2. Act
        let catalog = MediaCatalog::load(dir_path)?;

        // 3. Assert
        assert_eq!(catalog.language_count(), 2, "Should only load .json files");
        assert_eq!(catalog.resolve("intro_fr_1", "fr").await?, "https://cdn/fr/intro1.mp4");
        // French has no idle clip of its own.
        assert_eq!(catalog.resolve("idle_listen", "fr").await?, "https://cdn/en/idle.mp4");

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_clip_is_media_not_found() -> Result<()> {
        let dir = tempdir()?;
        let mut en = File::create(dir.path().join("en.json"))?;
        writeln!(en, "{{}}")?;
        let catalog = MediaCatalog::load(dir.path())?;

        let err = catalog.resolve("idle_smile", "de").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SessionError>(),
            Some(SessionError::MediaNotFound { name, .. }) if name == "idle_smile"
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_catalog_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let mut broken = File::create(dir.path().join("en.json"))?;
        writeln!(broken, "[1, 2, 3]")?;

        assert!(MediaCatalog::load(dir.path()).is_err());
        Ok(())
    }

    #[test]
    fn test_load_from_nonexistent_dir() {
        let result = MediaCatalog::load(Path::new("nonexistent_dir_for_testing_media"));
        assert!(result.is_err());
    }
}
