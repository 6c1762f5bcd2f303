//! Serves the localfs provider to the host that launched this binary

use std::process::ExitCode;

use tfplugin_sdk::ServeOptions;

fn main() -> ExitCode {
    tfplugin_sdk::serve(ServeOptions::new(tfprovider_localfs::provider))
}
