//! Common definitions shared between the counter client and server

#![allow(dead_code)]

/// Type id of the shared counter
pub const COUNTER_TYPE: &str = "Counter";

/// Handle kind advertised for counters
pub const COUNTER_KIND: &str = "counter";

/// Type id for plain hosted values
pub const VALUE_TYPE: &str = "Value";

/// Default server address
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default store port
pub const DEFAULT_PORT: u16 = 12360;
/// Key used when none is given on the command line
pub const DEFAULT_KEY: &str = "counter-demo";
