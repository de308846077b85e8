//! Client-side data layer for the content catalog backend: a typed HTTP
//! gateway, optimistic collection stores, and the sync job controller.

pub mod catalog;
pub mod config;
pub mod gateway;
pub mod optimistic_store;
pub mod sync_controller;
pub mod token_store;

pub use catalog::CatalogClient;
pub use config::{load_settings, ClientConfig, SyncConfig};
pub use gateway::{HttpGateway, RemoteEntity, RemoteGateway};
pub use optimistic_store::{
    CollectionSnapshot, ContentStore, FetchOutcome, MutationRecord, OptimisticStore, ThemeStore,
};
pub use sync_controller::{SyncController, SyncSnapshot, SyncState};
pub use token_store::{AuthTokens, TokenStore, TokenStoreError};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
