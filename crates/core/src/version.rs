//! Library version and the database compatibility rule (spec §4.1).

use crate::config::Config;
use crate::error::{Error, Result};

/// Major version. Bumping it is a breaking change for existing databases.
pub const VERSION_MAJOR: u32 = 0;
/// Minor version.
pub const VERSION_MINOR: u32 = 1;
/// Patch version.
pub const VERSION_PATCH: u32 = 0;
/// Development counter. Only meaningful while major.minor.patch is 0.0.0.
pub const VERSION_DEVEL: u32 = 1;

/// Checks a database's recorded version against the running library,
/// following the rule in spec §4.1: reject if `major` differs, or — while
/// still in `0.0.0` development — if `devel` differs.
pub fn check_compatible(config: &Config) -> Result<()> {
    let stored_major = config.get_u32("major")?;
    let stored_minor = config.get_u32("minor")?;
    let stored_patch = config.get_u32("patch")?;
    let stored_devel = config.get_u32("devel")?;

    let breaking = stored_major != VERSION_MAJOR
        || (stored_major == 0
            && VERSION_MAJOR == 0
            && stored_minor == 0
            && VERSION_MINOR == 0
            && stored_patch == 0
            && VERSION_PATCH == 0
            && stored_devel != VERSION_DEVEL);

    if breaking {
        return Err(Error::VersionMismatch {
            stored: crate::error::format_version(
                stored_major,
                stored_minor,
                stored_patch,
                stored_devel,
            ),
            running: crate::error::format_version(
                VERSION_MAJOR,
                VERSION_MINOR,
                VERSION_PATCH,
                VERSION_DEVEL,
            ),
        });
    }
    Ok(())
}

/// Stamps a fresh config with the running library's version.
pub fn write_version(config: &mut Config) {
    config.set("major", VERSION_MAJOR.to_string());
    config.set("minor", VERSION_MINOR.to_string());
    config.set("patch", VERSION_PATCH.to_string());
    config.set("devel", VERSION_DEVEL.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_version_is_compatible() {
        let mut cfg = Config::new();
        write_version(&mut cfg);
        assert!(check_compatible(&cfg).is_ok());
    }

    #[test]
    fn different_major_is_incompatible() {
        let mut cfg = Config::new();
        write_version(&mut cfg);
        cfg.set("major", (VERSION_MAJOR + 1).to_string());
        assert!(check_compatible(&cfg).is_err());
    }

    #[test]
    fn devel_mismatch_rejected_only_in_0_0_0() {
        let mut cfg = Config::new();
        write_version(&mut cfg);
        cfg.set("devel", (VERSION_DEVEL + 1).to_string());
        // VERSION_MAJOR/MINOR/PATCH are 0.1.0 in this build, so a devel
        // mismatch alone is not breaking.
        assert!(check_compatible(&cfg).is_ok());
    }
}
