//! Generated protobuf modules
//!
//! Code generated by `build.rs` from `protos/meshtastic/*.proto` when the
//! `meshtastic-proto` feature is enabled.

#[cfg(feature = "meshtastic-proto")]
pub mod meshtastic_generated {
    //! Generated Meshtastic protobuf types (prost emits one file per package: meshtastic.rs).
    #[allow(dead_code, unused_imports, unused_variables, unused_mut, unused_macros)]
    #[allow(clippy::all)]
    #[allow(rustdoc::invalid_html_tags)]
    mod inner {
        include!(concat!(env!("OUT_DIR"), "/meshtastic.rs"));
    }
    pub use inner::*;
}
