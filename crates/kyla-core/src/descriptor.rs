//! Build descriptor: which files, grouped into which file-sets, packed how.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use uuid::Uuid;

/// Physical layout the builder should emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum PackageKind {
    Loose,
    Packed,
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    package: RawPackage,
    #[serde(default, rename = "fileset")]
    filesets: Vec<RawFileset>,
}

#[derive(Debug, Deserialize)]
struct RawPackage {
    #[serde(rename = "type")]
    kind: PackageKind,
}

#[derive(Debug, Deserialize)]
struct RawFileset {
    id: String,
    name: String,
    #[serde(default, rename = "file")]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    source: String,
    target: Option<String>,
}

/// One file to package: where it comes from and where it installs to.
/// The target defaults to the source path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorFile {
    pub source: String,
    pub target: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DescriptorFileset {
    pub id: Uuid,
    pub name: String,
    pub files: Vec<DescriptorFile>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub kind: PackageKind,
    pub filesets: Vec<DescriptorFileset>,
}

impl Descriptor {
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawDescriptor = toml::from_str(text).context("failed to parse descriptor")?;
        let mut filesets = Vec::with_capacity(raw.filesets.len());
        for fileset in raw.filesets {
            let id = Uuid::parse_str(&fileset.id)
                .with_context(|| format!("file set '{}' has a malformed id", fileset.name))?;
            let files = fileset
                .files
                .into_iter()
                .map(|file| {
                    let target = file.target.unwrap_or_else(|| file.source.clone());
                    DescriptorFile {
                        source: file.source,
                        target,
                    }
                })
                .collect();
            filesets.push(DescriptorFileset {
                id,
                name: fileset.name,
                files,
            });
        }
        if filesets.is_empty() {
            bail!("descriptor declares no file sets");
        }
        Ok(Self {
            kind: raw.package.kind,
            filesets,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read descriptor {}", path.display()))?;
        Self::parse(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTOR: &str = r#"
[package]
type = "Loose"

[[fileset]]
id = "d17e430b-e1e4-4b41-95a9-0a9dd9a5b91c"
name = "core"

  [[fileset.file]]
  source = "a.txt"

  [[fileset.file]]
  source = "b.txt"
  target = "renamed/b.txt"
"#;

    #[test]
    fn parses_filesets_and_defaults_targets() -> Result<()> {
        let descriptor = Descriptor::parse(DESCRIPTOR)?;
        assert_eq!(descriptor.kind, PackageKind::Loose);
        assert_eq!(descriptor.filesets.len(), 1);
        let fileset = &descriptor.filesets[0];
        assert_eq!(fileset.name, "core");
        assert_eq!(
            fileset.id,
            Uuid::parse_str("d17e430b-e1e4-4b41-95a9-0a9dd9a5b91c").expect("uuid")
        );
        assert_eq!(fileset.files[0].target, "a.txt");
        assert_eq!(fileset.files[1].target, "renamed/b.txt");
        Ok(())
    }

    #[test]
    fn uppercase_ids_are_accepted() -> Result<()> {
        let text = DESCRIPTOR.replace(
            "d17e430b-e1e4-4b41-95a9-0a9dd9a5b91c",
            "D17E430B-E1E4-4B41-95A9-0A9DD9A5B91C",
        );
        let descriptor = Descriptor::parse(&text)?;
        assert_eq!(
            descriptor.filesets[0].id,
            Uuid::parse_str("d17e430b-e1e4-4b41-95a9-0a9dd9a5b91c").expect("uuid")
        );
        Ok(())
    }

    #[test]
    fn packed_type_selects_the_packed_backend() -> Result<()> {
        let text = DESCRIPTOR.replace("\"Loose\"", "\"Packed\"");
        assert_eq!(Descriptor::parse(&text)?.kind, PackageKind::Packed);
        Ok(())
    }

    #[test]
    fn missing_package_type_is_an_error() {
        assert!(Descriptor::parse("[[fileset]]\nid = \"x\"\nname = \"y\"\n").is_err());
    }

    #[test]
    fn empty_fileset_list_is_an_error() {
        assert!(Descriptor::parse("[package]\ntype = \"Loose\"\n").is_err());
    }
}
