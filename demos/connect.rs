use std::time::Duration;

use ipmi_rmcp::{Client, Interface};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Example:
    //   IPMI_DEBUG=1 cargo run --example connect -- 192.168.1.10:623 admin password [lan|lanplus] [suite]
    let mut args = std::env::args().skip(1);
    let target = args.next().ok_or("missing <host:port>")?.parse()?;
    let username = args.next().ok_or("missing <username>")?;
    let password = args.next().ok_or("missing <password>")?;
    let interface = match args.next().as_deref() {
        None | Some("auto") => Interface::Auto,
        Some("lan") => Interface::Lan,
        Some("lanplus") => Interface::Lanplus,
        Some(_) => return Err("interface must be auto, lan or lanplus".into()),
    };

    let mut builder = Client::builder(target)
        .username(username)
        .password(password)
        .interface(interface)
        .timeout(Duration::from_secs(2))
        .keep_alive(Some(Duration::from_secs(10)));
    if let Some(suite) = args.next() {
        builder = builder.cipher_suite(suite.parse()?);
    }

    let client = builder.build()?;
    println!(
        "connected: {} (cipher suite {:?})",
        client.ipmi_version()?,
        client.cipher_suite_id()?
    );

    let device = client.get_device_id()?;
    println!("Device ID: {device:?}");

    let info = client.get_session_info()?;
    println!("Session Info: {info:?}");

    client.close()?;
    println!("session state: {}", client.session_state()?);
    Ok(())
}
