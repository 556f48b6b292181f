// Copyright (c) 2026 Payline Labs. MIT License.
// See LICENSE for details.

//! # PAYLINE Settlement Engine — Core Library
//!
//! PAYLINE gives autonomous agents real purchasing power: a revolving
//! credit line funded by a pooled liquidity vault, spent through a 2-of-2
//! co-signing scheme where neither the server nor the agent can move money
//! alone. This crate is the settlement engine that sits underneath the API
//! surface and makes three promises at once, under concurrency:
//!
//! 1. An agent never spends past its credit limit.
//! 2. The vault never lends out more than it holds.
//! 3. A transfer is never broadcast without a validly reconstructed
//!    signature, and never left half-applied when a broadcast fails.
//!
//! Everything else in the product (HTTP routing, auth, the compliance
//! pipeline, chain RPC clients, cron jobs) is a collaborator that plugs in
//! at the edges of this crate through traits.
//!
//! ## Architecture
//!
//! - **crypto** — Shard sealing and the additive 2-of-2 key splitter.
//!   The full signing key exists only for microseconds, then gets zeroized.
//! - **ledger** — The two leaf ledgers: per-agent revolving credit and the
//!   pooled liquidity vault, plus the merchant fee registry. Neither ledger
//!   calls the other; only the orchestrator composes them.
//! - **settlement** — The payment orchestrator and its state machine:
//!   dedupe, verdict, reserve, debit, co-sign, broadcast, settle. Every
//!   failure after a reservation unwinds with a compensating rollback.
//! - **scoring** — Pure risk and delinquency functions for external
//!   schedulers. No state, no coupling.
//! - **config** — Every constant in one place. Hardcode a number elsewhere
//!   and you owe the team coffee.
//!
//! ## Design Philosophy
//!
//! 1. Ledger math is integer fixed-point. Floats are for reports.
//! 2. Business failures are values, not panics. The error enums are the API.
//! 3. If it touches money, it has tests. Plural.

pub mod config;
pub mod crypto;
pub mod ledger;
pub mod scoring;
pub mod settlement;
