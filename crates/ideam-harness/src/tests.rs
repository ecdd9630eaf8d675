use std::path::Path;

use ideam::entity::EntityId;

use ideam_client::client::Client;
use ideam_client::config::{MiddlewareConfig, Scheme};

use ideam_mock::MockMiddleware;

use crate::sink::TimingRecord;

pub(crate) fn device(name: &str) -> EntityId {
    EntityId::new(name).unwrap()
}

pub(crate) fn config_for(mock: &MockMiddleware) -> MiddlewareConfig {
    MiddlewareConfig::new(mock.address().ip().to_string())
        .scheme(Scheme::Http)
        .port(mock.address().port())
        .api_version(mock.api_version())
}

pub(crate) fn client_for(mock: &MockMiddleware) -> Client {
    Client::new(&config_for(mock)).unwrap()
}

pub(crate) fn read_records(path: &Path) -> Vec<TimingRecord> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| line.parse().unwrap())
        .collect()
}
