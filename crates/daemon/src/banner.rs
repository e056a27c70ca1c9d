use std::net::SocketAddr;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use shinbot_core::SweepMode;

/// Browser URL of the live map for a server bound to `listen`.
pub fn map_url(listen: SocketAddr) -> String {
    let host = if listen.ip().is_unspecified() {
        "localhost".to_owned()
    } else if listen.is_ipv6() {
        format!("[{}]", listen.ip())
    } else {
        listen.ip().to_string()
    };
    format!("http://{host}:{}/map", listen.port())
}

/// Startup summary printed once the account is resolved.
pub fn startup_table(listen: SocketAddr, email: &str, username: &str, mode: SweepMode) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Name", "Value"]);

    let rows = [
        ("Live map", map_url(listen)),
        ("Email", email.to_owned()),
        ("Username", username.to_owned()),
        ("Sweep", mode.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![
            Cell::new(name).fg(Color::Cyan),
            Cell::new(value).add_attribute(Attribute::Bold),
        ]);
    }
    table
}
