// src/lib.rs
pub mod error;
pub mod config;

pub mod io {
    pub mod npy;
    pub mod layout;
    pub mod hashing;
}

pub mod sorting;
pub mod unit_matching;
pub mod focus;
pub mod spike_train;
