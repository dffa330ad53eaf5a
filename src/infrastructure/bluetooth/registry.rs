//! Endpoint Registry
//!
//! Lookup from `(service, characteristic)` pairs to the endpoints found
//! during discovery. Filled once per discovery and cleared on disconnect;
//! the owning session is its only writer.

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Address of an endpoint inside a discovered service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndpointAddress {
    pub service: Uuid,
    pub endpoint: Uuid,
}

impl EndpointAddress {
    pub fn new(service: Uuid, endpoint: Uuid) -> Self {
        Self { service, endpoint }
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.endpoint)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredEndpoint {
    pub id: Uuid,
    pub properties: EndpointProperties,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub id: Uuid,
    pub endpoints: Vec<DiscoveredEndpoint>,
}

/// Resolved endpoint, valid while the session stays ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHandle {
    pub address: EndpointAddress,
    pub properties: EndpointProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("endpoint {0} not found")]
    NotFound(EndpointAddress),
}

#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<EndpointAddress, EndpointHandle>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with the result of a discovery pass
    pub fn populate(&mut self, services: &[DiscoveredService]) {
        if !self.endpoints.is_empty() {
            warn!("Endpoint registry repopulated without being cleared");
            self.endpoints.clear();
        }

        for service in services {
            debug!("Discovered service: {}", service.id);
            for endpoint in &service.endpoints {
                debug!("Characteristic: {} {:?}", endpoint.id, endpoint.properties);
                let address = EndpointAddress::new(service.id, endpoint.id);
                self.endpoints.insert(
                    address,
                    EndpointHandle {
                        address,
                        properties: endpoint.properties,
                    },
                );
            }
        }
    }

    pub fn resolve(&self, address: &EndpointAddress) -> Result<&EndpointHandle, RegistryError> {
        self.endpoints
            .get(address)
            .ok_or(RegistryError::NotFound(*address))
    }

    pub fn clear(&mut self) {
        self.endpoints.clear();
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn services() -> Vec<DiscoveredService> {
        vec![
            DiscoveredService {
                id: uuid(1),
                endpoints: vec![
                    DiscoveredEndpoint {
                        id: uuid(10),
                        properties: EndpointProperties {
                            write: true,
                            ..Default::default()
                        },
                    },
                    DiscoveredEndpoint {
                        id: uuid(11),
                        properties: EndpointProperties {
                            read: true,
                            notify: true,
                            ..Default::default()
                        },
                    },
                ],
            },
            DiscoveredService {
                id: uuid(2),
                endpoints: vec![DiscoveredEndpoint {
                    id: uuid(10),
                    properties: EndpointProperties::default(),
                }],
            },
        ]
    }

    #[test]
    fn test_resolve_by_pair() {
        let mut registry = EndpointRegistry::new();
        registry.populate(&services());
        assert_eq!(registry.len(), 3);

        let handle = registry
            .resolve(&EndpointAddress::new(uuid(1), uuid(10)))
            .unwrap();
        assert!(handle.properties.write);

        // Same characteristic id under another service is a different endpoint
        let other = registry
            .resolve(&EndpointAddress::new(uuid(2), uuid(10)))
            .unwrap();
        assert!(!other.properties.write);
    }

    #[test]
    fn test_not_found() {
        let mut registry = EndpointRegistry::new();
        registry.populate(&services());
        let missing = EndpointAddress::new(uuid(2), uuid(11));
        assert_eq!(
            registry.resolve(&missing),
            Err(RegistryError::NotFound(missing))
        );
    }

    #[test]
    fn test_clear_and_repopulate() {
        let mut registry = EndpointRegistry::new();
        registry.populate(&services());
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry
            .resolve(&EndpointAddress::new(uuid(1), uuid(10)))
            .is_err());

        registry.populate(&services()[1..]);
        assert_eq!(registry.len(), 1);
    }
}
