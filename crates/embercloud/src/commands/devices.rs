//! Device directory listing.

use tabled::Tabled;

use embercloud_core::{Controller, Thing};

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
}

fn row(t: &Thing) -> DeviceRow {
    DeviceRow {
        id: t.thing_name.clone(),
        name: t.friendly_name.clone().unwrap_or_default(),
    }
}

pub async fn handle(controller: &Controller, global: &GlobalOpts) -> Result<(), CliError> {
    let directory = controller.load_directory().await?;

    let out = output::render_list(
        &global.output,
        directory.as_slice(),
        row,
        |t| t.thing_name.clone(),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}
