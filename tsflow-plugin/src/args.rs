//! Plugin argument analysis.
//!
//! Plugin options are declared as a `clap::Command` and analyzed in
//! library mode: parsing never exits the process, never prints to
//! stdout, and reports failures as ordinary errors. This is the
//! behaviour the restart protocol relies on when trying new arguments
//! against a live plugin.

use crate::api::Plugin;
use crate::error::{Error, Result};

/// Analyze an argument vector against a plugin's declared options.
///
/// `args` holds only the plugin's own arguments, without the plugin
/// name. A parse failure (including a help request) is returned as
/// [`Error::InvalidArguments`].
pub fn analyze(name: &str, plugin: &dyn Plugin, args: &[String]) -> Result<clap::ArgMatches> {
    plugin
        .options()
        .name(name.to_string())
        .about(plugin.description())
        .no_binary_name(true)
        .try_get_matches_from(args)
        .map_err(|e| Error::InvalidArguments {
            plugin: name.to_string(),
            message: e.to_string(),
        })
}
