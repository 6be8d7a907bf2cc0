// src/lib.rs

// On déclare nos modules principaux pour les rendre publics et
// utilisables par nos programmes binaires (transfer_bot.rs).
pub mod config;
pub mod execution;
pub mod monitoring;
pub mod rpc;
