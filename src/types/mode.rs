use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// permitted tree entry modes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileMode {
    Directory,
    Regular,
    Executable,
    Symlink,
    Submodule,
}

impl FileMode {
    /// numeric mode value
    pub fn bits(&self) -> u32 {
        match self {
            FileMode::Directory => 0o040000,
            FileMode::Regular => 0o100644,
            FileMode::Executable => 0o100755,
            FileMode::Symlink => 0o120000,
            FileMode::Submodule => 0o160000,
        }
    }

    /// mode from numeric value, None if not one of the five permitted modes
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0o040000 => Some(FileMode::Directory),
            0o100644 => Some(FileMode::Regular),
            0o100755 => Some(FileMode::Executable),
            0o120000 => Some(FileMode::Symlink),
            0o160000 => Some(FileMode::Submodule),
            _ => None,
        }
    }

    /// octal form used inside tree objects (no zero padding)
    pub fn as_tree_str(&self) -> &'static str {
        match self {
            FileMode::Directory => "40000",
            FileMode::Regular => "100644",
            FileMode::Executable => "100755",
            FileMode::Symlink => "120000",
            FileMode::Submodule => "160000",
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, FileMode::Directory)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FileMode::Directory => "tree",
            FileMode::Submodule => "commit",
            _ => "blob",
        }
    }
}

/// six digit octal, as ls-tree prints it
impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06o}", self.bits())
    }
}

impl FromStr for FileMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bits = u32::from_str_radix(s, 8).map_err(|_| Error::InvalidFileMode(s.to_string()))?;
        Self::from_bits(bits).ok_or_else(|| Error::InvalidFileMode(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("40000".parse::<FileMode>().unwrap(), FileMode::Directory);
        assert_eq!("040000".parse::<FileMode>().unwrap(), FileMode::Directory);
        assert_eq!("100644".parse::<FileMode>().unwrap(), FileMode::Regular);
        assert_eq!("100755".parse::<FileMode>().unwrap(), FileMode::Executable);
        assert_eq!("120000".parse::<FileMode>().unwrap(), FileMode::Symlink);
        assert_eq!("160000".parse::<FileMode>().unwrap(), FileMode::Submodule);
    }

    #[test]
    fn test_mode_rejects_others() {
        assert!("100664".parse::<FileMode>().is_err());
        assert!("abc".parse::<FileMode>().is_err());
        assert!("".parse::<FileMode>().is_err());
        assert!("100649".parse::<FileMode>().is_err()); // not octal
    }

    #[test]
    fn test_mode_strings() {
        for mode in [
            FileMode::Directory,
            FileMode::Regular,
            FileMode::Executable,
            FileMode::Symlink,
            FileMode::Submodule,
        ] {
            assert_eq!(mode.as_tree_str().parse::<FileMode>().unwrap(), mode);
            assert_eq!(format!("{:o}", mode.bits()), mode.as_tree_str());
        }
        assert_eq!(FileMode::Directory.to_string(), "040000");
    }
}
