use derive_more::Into;
use thiserror::Error;

const MAX_FILE_NAME_BYTES: usize = 255;

#[derive(Error, Debug, Clone)]
pub enum FileNameTryFromError {
    #[error("File name must not be empty")]
    Empty,
    #[error("File name exceeds maximum length")]
    TooLong,
    #[error("File name contains a forbidden character")]
    ForbiddenCharacter,
    #[error("File name is reserved")]
    Reserved,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Into)]
pub struct FileName(String);

impl FileName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splits into `(stem, extension)` where the extension keeps its leading
    /// dot. `"archive.tar.gz"` splits as `("archive.tar", ".gz")`; names
    /// without a dot (or dotfiles like `".env"`) have an empty extension.
    pub fn split_extension(&self) -> (&str, &str) {
        match self.0.rfind('.') {
            Some(idx) if idx > 0 => self.0.split_at(idx),
            _ => (self.0.as_str(), ""),
        }
    }

    // for repository
    pub fn from_unchecked(name: String) -> Self {
        Self(name)
    }
}

impl TryFrom<String> for FileName {
    type Error = FileNameTryFromError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() {
            Err(FileNameTryFromError::Empty)
        } else if value.len() > MAX_FILE_NAME_BYTES {
            Err(FileNameTryFromError::TooLong)
        } else if value.contains('/') || value.contains('\0') {
            Err(FileNameTryFromError::ForbiddenCharacter)
        } else if value == "." || value == ".." {
            Err(FileNameTryFromError::Reserved)
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<&str> for FileName {
    type Error = FileNameTryFromError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        FileName::try_from(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        assert!(FileName::try_from("notes.txt").is_ok());
        assert!(FileName::try_from("日本語ファイル.txt").is_ok());
        assert!(FileName::try_from(".env").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(
            FileName::try_from(""),
            Err(FileNameTryFromError::Empty)
        ));
    }

    #[test]
    fn rejects_separator_and_nul() {
        assert!(matches!(
            FileName::try_from("a/b"),
            Err(FileNameTryFromError::ForbiddenCharacter)
        ));
        assert!(matches!(
            FileName::try_from("a\0b"),
            Err(FileNameTryFromError::ForbiddenCharacter)
        ));
    }

    #[test]
    fn rejects_reserved() {
        assert!(matches!(
            FileName::try_from("."),
            Err(FileNameTryFromError::Reserved)
        ));
        assert!(matches!(
            FileName::try_from(".."),
            Err(FileNameTryFromError::Reserved)
        ));
    }

    #[test]
    fn rejects_overlong() {
        let name = "x".repeat(256);
        assert!(matches!(
            FileName::try_from(name),
            Err(FileNameTryFromError::TooLong)
        ));
    }

    #[test]
    fn split_extension_variants() {
        let name = FileName::try_from("a.txt").unwrap();
        assert_eq!(name.split_extension(), ("a", ".txt"));

        let name = FileName::try_from("archive.tar.gz").unwrap();
        assert_eq!(name.split_extension(), ("archive.tar", ".gz"));

        let name = FileName::try_from("README").unwrap();
        assert_eq!(name.split_extension(), ("README", ""));

        let name = FileName::try_from(".env").unwrap();
        assert_eq!(name.split_extension(), (".env", ""));
    }
}
