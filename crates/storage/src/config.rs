//! Configuration for the repository, the in-memory cache and the service
//! identity that seeds id generation.
//!
//! All configuration is constructed explicitly and handed to the components
//! that need it. Nothing here is process-global.

use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, document::SortDirection};

/// Default number of items per roll page.
pub const DEFAULT_PAGE_SIZE: u64 = 20;

/// Upper bound applied to caller-requested page sizes.
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 1000;

/// Field the roll page sorts by when the caller names none.
pub const DEFAULT_SORT_KEY: &str = "updatedAt";

/// Interval of the in-memory cache's expiry sweep.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Identity of the running service instance.
///
/// Replaces process-wide "service info" statics: construct one at startup and
/// pass it to the [`IdGenerator`](crate::id::IdGenerator) and anything else
/// that needs to know where it runs.
///
/// # Example
///
/// ```
/// use std::net::{IpAddr, Ipv4Addr};
/// use microbase_storage::config::ServiceInfo;
///
/// let info = ServiceInfo::builder()
///     .service_name("order-service")
///     .address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
///     .port(8080)
///     .build()?;
/// assert!(info.worker_id() < 32);
/// # Ok::<(), microbase_storage::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceInfo {
    pub(crate) service_name: String,
    pub(crate) address: IpAddr,
    pub(crate) port: u16,
    #[serde(default = "default_datacenter_id")]
    pub(crate) datacenter_id: u8,
}

fn default_datacenter_id() -> u8 {
    1
}

#[bon::bon]
impl ServiceInfo {
    /// Creates a validated service identity.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Empty`] for a blank service name and
    /// [`ConfigError::BelowMinimum`] if `datacenter_id` does not fit in five bits.
    #[builder]
    pub fn new(
        #[builder(into)] service_name: String,
        #[builder(default = IpAddr::V4(Ipv4Addr::LOCALHOST))] address: IpAddr,
        #[builder(default = 0)] port: u16,
        #[builder(default = default_datacenter_id())] datacenter_id: u8,
    ) -> Result<Self, ConfigError> {
        if service_name.trim().is_empty() {
            return Err(ConfigError::Empty { field: "service_name" });
        }
        if datacenter_id > 31 {
            return Err(ConfigError::BelowMinimum {
                field: "datacenter_id (max 31)",
                min: "0".into(),
                value: datacenter_id.to_string(),
            });
        }
        Ok(Self { service_name, address, port, datacenter_id })
    }

    /// Returns the service name.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the address the instance is reachable on.
    #[must_use]
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Returns the listening port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the datacenter id used by id generation.
    #[must_use]
    pub fn datacenter_id(&self) -> u8 {
        self.datacenter_id
    }

    /// Worker id for id generation: `(address as integer + port) % 32`.
    ///
    /// Two instances on the same host with different ports get different
    /// workers as long as their ports differ modulo 32.
    #[must_use]
    pub fn worker_id(&self) -> u8 {
        let addr = match self.address {
            IpAddr::V4(v4) => u64::from(u32::from(v4)),
            IpAddr::V6(v6) => (u128::from(v6) & u128::from(u32::MAX)) as u64,
        };
        ((addr + u64::from(self.port)) % 32) as u8
    }

    /// Returns `true` when the instance runs on a private `192.168.0.0/16`
    /// network, which is how internal test environments are recognised.
    #[must_use]
    pub fn is_internal_network(&self) -> bool {
        matches!(self.address, IpAddr::V4(v4) if v4.octets()[..2] == [192, 168])
    }
}

/// Paging and sorting defaults for [`Repository`](crate::repository::Repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    #[serde(default = "default_page_size")]
    pub(crate) default_page_size: u64,
    #[serde(default = "default_max_page_size")]
    pub(crate) max_page_size: u64,
    #[serde(default = "default_sort_key")]
    pub(crate) default_sort_key: String,
    #[serde(default)]
    pub(crate) default_sort_direction: SortDirection,
}

fn default_page_size() -> u64 {
    DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> u64 {
    DEFAULT_MAX_PAGE_SIZE
}

fn default_sort_key() -> String {
    DEFAULT_SORT_KEY.to_owned()
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            default_sort_key: DEFAULT_SORT_KEY.to_owned(),
            default_sort_direction: SortDirection::Desc,
        }
    }
}

#[bon::bon]
impl RepositoryConfig {
    /// Creates a validated repository configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a page size is zero, the default page size
    /// exceeds the maximum, or the sort key is blank.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_PAGE_SIZE)] default_page_size: u64,
        #[builder(default = DEFAULT_MAX_PAGE_SIZE)] max_page_size: u64,
        #[builder(into, default = DEFAULT_SORT_KEY.to_owned())] default_sort_key: String,
        #[builder(default)] default_sort_direction: SortDirection,
    ) -> Result<Self, ConfigError> {
        if default_page_size == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "default_page_size",
                min: "1".into(),
                value: "0".into(),
            });
        }
        if max_page_size < default_page_size {
            return Err(ConfigError::BelowMinimum {
                field: "max_page_size",
                min: default_page_size.to_string(),
                value: max_page_size.to_string(),
            });
        }
        if default_sort_key.trim().is_empty() {
            return Err(ConfigError::Empty { field: "default_sort_key" });
        }
        Ok(Self { default_page_size, max_page_size, default_sort_key, default_sort_direction })
    }

    /// Page size used when the caller does not ask for one.
    #[must_use]
    pub fn default_page_size(&self) -> u64 {
        self.default_page_size
    }

    /// Largest page size a caller can request; larger requests are clamped.
    #[must_use]
    pub fn max_page_size(&self) -> u64 {
        self.max_page_size
    }

    /// Sort key used when the caller does not name one.
    #[must_use]
    pub fn default_sort_key(&self) -> &str {
        &self.default_sort_key
    }

    /// Sort direction used when the caller does not name one.
    #[must_use]
    pub fn default_sort_direction(&self) -> SortDirection {
        self.default_sort_direction
    }
}

/// Configuration for [`MemoryCache`](crate::cache::MemoryCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(with = "humantime_serde", default = "default_cleanup_interval")]
    pub(crate) cleanup_interval: Duration,
}

fn default_cleanup_interval() -> Duration {
    DEFAULT_CLEANUP_INTERVAL
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { cleanup_interval: DEFAULT_CLEANUP_INTERVAL }
    }
}

#[bon::bon]
impl CacheConfig {
    /// Creates a validated cache configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] for a zero cleanup interval.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_CLEANUP_INTERVAL)] cleanup_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if cleanup_interval.is_zero() {
            return Err(ConfigError::BelowMinimum {
                field: "cleanup_interval",
                min: "1ms".into(),
                value: "0s".into(),
            });
        }
        Ok(Self { cleanup_interval })
    }

    /// Interval between expiry sweeps.
    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::net::Ipv6Addr;

    use super::*;

    #[test]
    fn test_worker_id_mixes_address_and_port() {
        let base = ServiceInfo::builder()
            .service_name("svc")
            .address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .port(8080)
            .build()
            .unwrap();
        let expected = ((u64::from(u32::from(Ipv4Addr::new(10, 0, 0, 1))) + 8080) % 32) as u8;
        assert_eq!(base.worker_id(), expected);

        let neighbour = ServiceInfo::builder()
            .service_name("svc")
            .address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .port(8081)
            .build()
            .unwrap();
        assert_ne!(base.worker_id(), neighbour.worker_id());
    }

    #[test]
    fn test_worker_id_ipv6_in_range() {
        let info = ServiceInfo::builder()
            .service_name("svc")
            .address(IpAddr::V6(Ipv6Addr::LOCALHOST))
            .port(9000)
            .build()
            .unwrap();
        assert!(info.worker_id() < 32);
    }

    #[test]
    fn test_service_info_rejects_blank_name() {
        let err = ServiceInfo::builder().service_name("  ").build().unwrap_err();
        assert_eq!(err, ConfigError::Empty { field: "service_name" });
    }

    #[test]
    fn test_service_info_rejects_wide_datacenter() {
        assert!(ServiceInfo::builder().service_name("svc").datacenter_id(32).build().is_err());
    }

    #[test]
    fn test_internal_network_detection() {
        let internal = ServiceInfo::builder()
            .service_name("svc")
            .address(IpAddr::V4(Ipv4Addr::new(192, 168, 3, 4)))
            .build()
            .unwrap();
        assert!(internal.is_internal_network());

        let public = ServiceInfo::builder()
            .service_name("svc")
            .address(IpAddr::V4(Ipv4Addr::new(52, 1, 2, 3)))
            .build()
            .unwrap();
        assert!(!public.is_internal_network());
    }

    #[test]
    fn test_repository_config_defaults() {
        let config = RepositoryConfig::builder().build().unwrap();
        assert_eq!(config, RepositoryConfig::default());
        assert_eq!(config.default_page_size(), 20);
        assert_eq!(config.default_sort_key(), "updatedAt");
        assert_eq!(config.default_sort_direction(), SortDirection::Desc);
    }

    #[test]
    fn test_repository_config_validation() {
        assert!(RepositoryConfig::builder().default_page_size(0).build().is_err());
        assert!(
            RepositoryConfig::builder().default_page_size(50).max_page_size(10).build().is_err()
        );
        assert!(RepositoryConfig::builder().default_sort_key(" ").build().is_err());
    }

    #[test]
    fn test_repository_config_from_json_uses_defaults() {
        let config: RepositoryConfig = serde_json::from_str(r#"{"max_page_size": 200}"#).unwrap();
        assert_eq!(config.max_page_size(), 200);
        assert_eq!(config.default_page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_cache_config_humantime() {
        let config: CacheConfig = serde_json::from_str(r#"{"cleanup_interval": "250ms"}"#).unwrap();
        assert_eq!(config.cleanup_interval(), Duration::from_millis(250));
        assert!(CacheConfig::builder().cleanup_interval(Duration::ZERO).build().is_err());
    }
}
