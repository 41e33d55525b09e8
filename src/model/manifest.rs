use std::path::{Path, PathBuf};

use super::ParseError;

pub const DEFAULT_MANIFEST_FILE: &str = "requirements.txt";

/// One installable line of a pip requirements file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Distribution name without version specifiers, extras or markers.
    pub name: String,
    /// The requirement exactly as pip should receive it.
    pub specifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyManifest {
    pub path: PathBuf,
    pub requirements: Vec<Requirement>,
}

impl DependencyManifest {
    pub fn from_file(path: &Path) -> Result<DependencyManifest, ParseError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ParseError::IO {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_str(path, &contents))
    }

    /// Pip options (`-r`, `--index-url`, ...) are left to the batch install and skipped here.
    pub fn from_str(path: &Path, contents: &str) -> DependencyManifest {
        let requirements = contents
            .lines()
            .map(strip_comment)
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('-'))
            .filter_map(|line| {
                let name = line
                    .split(|c: char| "<>=!~;[@ \t".contains(c))
                    .next()
                    .unwrap_or("")
                    .trim();
                if name.is_empty() {
                    None
                } else {
                    Some(Requirement {
                        name: name.to_owned(),
                        specifier: line.to_owned(),
                    })
                }
            })
            .collect();

        DependencyManifest {
            path: path.to_path_buf(),
            requirements,
        }
    }
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(index) => &line[..index],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn parse_requirements() {
        let manifest = DependencyManifest::from_str(
            Path::new("requirements.txt"),
            "# core\n\
             requests>=2.31.0\n\
             \n\
             --index-url https://pypi.org/simple\n\
             beautifulsoup4 ==4.12.2  # html parsing\n\
             Pillow[jpeg]; python_version >= \"3.8\"\n\
             -r extra.txt\n\
             openai\n",
        );

        let names: Vec<&str> = manifest
            .requirements
            .iter()
            .map(|requirement| requirement.name.as_str())
            .collect();
        assert_eq!(names, vec!["requests", "beautifulsoup4", "Pillow", "openai"]);
        assert_eq!(
            manifest.requirements[1].specifier,
            "beautifulsoup4 ==4.12.2".to_owned()
        );
        assert_eq!(
            manifest.requirements[2].specifier,
            "Pillow[jpeg]; python_version >= \"3.8\"".to_owned()
        );
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let error = DependencyManifest::from_file(&dir.path().join(DEFAULT_MANIFEST_FILE))
            .expect_err("file does not exist");
        assert!(matches!(error, ParseError::IO { .. }));
    }
}
