//! Convenience macros for plugin development.

/// Export a plugin from a `cdylib` so the host can load it dynamically.
///
/// The argument is an expression building the plugin.
///
/// # Example
/// ```rust,ignore
/// plexus_plugin::export_plugin!(ReconPlugin::default());
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($ctor:expr) => {
        #[unsafe(no_mangle)]
        pub fn plexus_plugin_create() -> ::std::boxed::Box<dyn $crate::traits::Plugin> {
            ::std::boxed::Box::new($ctor)
        }
    };
}
