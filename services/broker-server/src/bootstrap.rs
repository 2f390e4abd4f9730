//! Demo data: a service catalog, pooled accounts, and users
//!
//! Seeding is additive: services already registered from the config file
//! keep their definitions.

use std::sync::Arc;

use broker_core::{Platform, ServiceDefinition, Tier, User};
use tracing::{debug, info};
use upstream::{Upstream, create_mock_services};

use crate::admin::Upstreams;

/// (id, name, monthly cost in cents, max concurrent streams)
const DEMO_CATALOG: &[(&str, &str, u64, u32)] = &[
    ("mock-netflix", "Mock Netflix", 1599, 4),
    ("mock-hulu", "Mock Hulu", 1799, 2),
    ("mock-disney", "Mock Disney+", 1399, 4),
    ("mock-hbo", "Mock HBO Max", 1599, 3),
    ("mock-spotify", "Mock Spotify", 1099, 1),
];

/// (service id, identity, secret, tier)
const DEMO_ACCOUNTS: &[(&str, &str, &str, Tier)] = &[
    ("mock-netflix", "pool-netflix-1@broker.local", "nf-pass-001", Tier::Premium),
    ("mock-netflix", "pool-netflix-2@broker.local", "nf-pass-002", Tier::Premium),
    ("mock-hulu", "pool-hulu-1@broker.local", "hu-pass-001", Tier::Standard),
    ("mock-disney", "pool-disney-1@broker.local", "dp-pass-001", Tier::Premium),
    ("mock-hbo", "pool-hbo-1@broker.local", "hb-pass-001", Tier::Premium),
    ("mock-spotify", "pool-spotify-1@broker.local", "sp-pass-001", Tier::Basic),
    ("mock-spotify", "pool-spotify-2@broker.local", "sp-pass-002", Tier::Basic),
    ("mock-spotify", "pool-spotify-3@broker.local", "sp-pass-003", Tier::Basic),
];

const DEMO_USERS: &[&str] = &["alice", "bob", "carol", "dave"];

/// Register services from the config file.
pub fn register_services(platform: &Platform, services: &[ServiceDefinition]) {
    for service in services {
        platform.store.add_service(service.clone());
        info!(service_id = %service.id, "service registered");
    }
}

/// Seed the demo catalog, accounts and users. Returns the mock upstreams,
/// with every demo account registered on its provider.
pub fn seed_demo(platform: &Platform) -> anyhow::Result<Upstreams> {
    for &(id, name, cost, streams) in DEMO_CATALOG {
        if platform.store.get_service(id).is_none() {
            platform
                .store
                .add_service(ServiceDefinition::new(id, name, cost, streams));
        }
    }

    let mocks = create_mock_services();
    for (id, mock) in &mocks {
        debug!(upstream = %id, name = mock.name(), "mock upstream ready");
    }
    for &(service_id, identity, secret, tier) in DEMO_ACCOUNTS {
        platform
            .vault
            .store_credential(service_id, identity, secret, tier)?;
        if let Some(mock) = mocks.get(service_id) {
            mock.register_account(identity, secret);
        }
    }

    for &username in DEMO_USERS {
        if platform.store.get_user_by_name(username).is_none() {
            platform.store.add_user(User {
                id: format!("user-{username}"),
                username: username.to_string(),
                created_at_ms: platform.now_millis(),
            });
        }
    }

    info!(
        services = DEMO_CATALOG.len(),
        credentials = DEMO_ACCOUNTS.len(),
        users = DEMO_USERS.len(),
        "demo data seeded"
    );

    Ok(mocks
        .into_iter()
        .map(|(id, mock)| (id, mock as Arc<dyn Upstream>))
        .collect())
}
