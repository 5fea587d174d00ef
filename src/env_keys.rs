//! Environment naming shared by the build script and the binary.

/// Every setting read from the environment starts with this.
pub const ENV_PREFIX: &str = "WINDSNAP_";

/// Tag opening each structured warning line. Looks like a setting, is not one.
pub const WARN_TAG: &str = "WINDSNAP_WARN";
