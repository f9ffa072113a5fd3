#![doc = "bucket-migrate-core: core pipeline of bucket-migrate."]

//! This crate contains the data model and pipeline for migrating objects from
//! a source bucket into a destination bucket, skipping objects already
//! migrated. SDK clients are not included here; they plug in through the
//! traits in [`contract`].
//!
//! # Usage
//! Construct a [`migrate::Migrator`] from a source store, a destination
//! store and a [`store::FingerprintStore`], then call [`migrate::Migrator::run`].

pub mod config;
pub mod contract;
pub mod copier;
pub mod fingerprint;
pub mod listing;
pub mod migrate;
pub mod store;
