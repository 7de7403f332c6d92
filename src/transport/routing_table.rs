// src/transport/routing_table.rs
//! Routing table mapping message boxes to network addresses
//!
//! Routes come from configuration (static) or are learnt from the
//! `reply_to` address of inbound frames. A static route is never
//! overwritten by a learnt one.

use crate::utils::errors::TransportError;
use crate::utils::ids::MessageBoxId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::{debug, info};

/// Route definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Destination message box
    pub target: MessageBoxId,

    /// Address of the transport hosting it
    pub address: SocketAddr,

    /// Learnt from traffic rather than configured
    pub learned: bool,
}

impl Route {
    pub fn new(target: impl Into<MessageBoxId>, address: SocketAddr) -> Self {
        Self {
            target: target.into(),
            address,
            learned: false,
        }
    }
}

#[derive(Default)]
pub struct RoutingTable {
    routes: RwLock<HashMap<MessageBoxId, Route>>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a configured route
    pub fn add_route(&self, route: Route) {
        info!("Adding route: {} -> {}", route.target, route.address);
        self.routes.write().insert(route.target.clone(), route);
    }

    /// Record the address a box was seen sending from
    pub fn learn(&self, target: &MessageBoxId, address: SocketAddr) {
        let mut routes = self.routes.write();
        match routes.get(target) {
            Some(existing) if !existing.learned || existing.address == address => {}
            _ => {
                debug!("Learnt route: {} -> {}", target, address);
                routes.insert(
                    target.clone(),
                    Route {
                        target: target.clone(),
                        address,
                        learned: true,
                    },
                );
            }
        }
    }

    pub fn remove_route(&self, target: &MessageBoxId) -> Result<Route, TransportError> {
        self.routes
            .write()
            .remove(target)
            .ok_or_else(|| TransportError::NoRoute(target.clone()))
    }

    pub fn lookup(&self, target: &MessageBoxId) -> Option<SocketAddr> {
        self.routes.read().get(target).map(|route| route.address)
    }

    pub fn get_routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.routes.read().values().cloned().collect();
        routes.sort_by(|a, b| a.target.cmp(&b.target));
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_add_and_lookup() {
        let table = RoutingTable::new();
        table.add_route(Route::new("runtime-b", addr(7401)));

        assert_eq!(table.lookup(&MessageBoxId::new("runtime-b")), Some(addr(7401)));
        assert_eq!(table.lookup(&MessageBoxId::new("runtime-c")), None);
    }

    #[test]
    fn test_learned_route_does_not_override_static() {
        let table = RoutingTable::new();
        table.add_route(Route::new("runtime-b", addr(7401)));
        table.learn(&MessageBoxId::new("runtime-b"), addr(9999));

        assert_eq!(table.lookup(&MessageBoxId::new("runtime-b")), Some(addr(7401)));
    }

    #[test]
    fn test_learned_route_follows_latest_address() {
        let table = RoutingTable::new();
        let id = MessageBoxId::new("runtime-c");
        table.learn(&id, addr(7402));
        table.learn(&id, addr(7403));

        assert_eq!(table.lookup(&id), Some(addr(7403)));
        assert!(table.get_routes()[0].learned);
    }

    #[test]
    fn test_remove_route() {
        let table = RoutingTable::new();
        table.add_route(Route::new("runtime-b", addr(7401)));

        table.remove_route(&MessageBoxId::new("runtime-b")).unwrap();
        assert!(table.is_empty());
        assert!(table.remove_route(&MessageBoxId::new("runtime-b")).is_err());
    }
}
