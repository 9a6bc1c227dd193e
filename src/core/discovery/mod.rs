pub mod service_discovery;

pub use service_discovery::{
    DnsRecord, HealthCheckOutcome, LoadBalanceStrategy, ServiceDiscovery, ServiceQuery, ServiceRecord,
    ServiceRegistration, ServiceStatus,
};
