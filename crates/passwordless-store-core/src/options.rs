// Storage options consumed by engine constructors.

use crate::logger::LoggerConfig;
use crate::models::TenantId;

/// Configuration for a storage engine.
#[derive(Debug, Clone, Default)]
pub struct StorageOptions {
    /// Logger configuration for the engine.
    pub logger: LoggerConfig,
    /// Default tenant used by callers that do not manage tenants themselves.
    pub default_tenant: TenantId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::LogLevel;

    #[test]
    fn test_default_options() {
        let options = StorageOptions::default();
        assert_eq!(options.default_tenant.as_str(), "public");
        assert_eq!(options.logger.level, LogLevel::Warn);
    }
}
