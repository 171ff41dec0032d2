//! C ABI for the rtpi priority-inheritance primitives.
//!
//! Callers allocate `pi_mutex_t` / `pi_cond_t` storage themselves (static,
//! heap, or a shared mapping) and pass pointers in. Every function returns 0
//! or a positive errno value.

#![deny(unsafe_code)]

#[allow(unsafe_code)]
pub mod pi_abi;

pub use pi_abi::{
    pi_cond_broadcast, pi_cond_destroy, pi_cond_init, pi_cond_signal, pi_cond_t, pi_cond_timedwait,
    pi_cond_wait, pi_mutex_destroy, pi_mutex_init, pi_mutex_lock, pi_mutex_t, pi_mutex_trylock,
    pi_mutex_unlock,
};
