//! Package and toolchain versions captured at build time
#![allow(dead_code)]

include!(concat!(env!("OUT_DIR"), "/built.rs"));
