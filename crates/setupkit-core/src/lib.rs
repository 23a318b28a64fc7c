mod outcome;
mod preferences;
mod product;
mod stage;
mod version;

pub use outcome::InstallOutcome;
pub use preferences::InstallPreferences;
pub use product::ProductConfig;
pub use stage::Stage;
pub use version::{Version, VersionParseError};

#[cfg(test)]
mod tests;
