//! tether-app — Interactive login + event stream demo.
//!
//! Usage:
//!   cargo run -p tether-app -- [config.json] [phone-number]
//!
//! With no stored credentials the server asks for a login method: a QR code
//! is requested by default, a pairing code when a phone number is given.
//! Set `credentialsPath` in the config file to skip login on the next run.

use tether_client::{Config, Event, SessionConnection};

#[tokio::main]
async fn main() {
    // Override with RUST_LOG=tether_client=debug cargo run -p tether-app
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("tether_client=info,tether_app=info"),
    )
    .init();

    if let Err(e) = run().await {
        eprintln!("\n✗ {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => Config::load(&path)?,
        None       => Config::default(),
    };
    let phone = args.next();

    println!("🔌 Connecting to {} …", config.url);
    let conn = SessionConnection::new(config);
    let mut events = conn.subscribe();
    conn.connect().await?;

    // ── Event loop ─────────────────────────────────────────────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            _ = &mut shutdown => break,
            ev = events.next() => match ev {
                Some(ev) => ev,
                None     => break,
            },
        };

        match event {
            Event::AuthMethodRequired => {
                // The challenge itself arrives as an event below.
                match phone.as_deref() {
                    Some(number) => { conn.request_pairing_code(Some(number)).await?; }
                    None         => { conn.request_qr_code().await?; }
                }
            }
            Event::Qr(code) => {
                println!("📷 Scan this QR payload with your phone:\n\n    {code}\n");
            }
            Event::PairingCode(code) => {
                println!("🔢 Enter this pairing code on your phone: {code}");
            }
            Event::Authenticated(creds) => {
                println!("✅ Authenticated (session {})", creds.session.as_deref().unwrap_or("-"));
            }
            Event::Ready => {
                let since = conn.connected_since()
                    .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("\n👂 Ready since {since}, listening for events (Ctrl+C to quit) …\n");
            }
            Event::Message(m) | Event::MessageCreate(m) => {
                let who = if m.from_me { "me" } else { m.from.as_str() };
                println!("📨 [{}] {who}: {}", m.id, m.body);
            }
            Event::MessageRevoke(r) => {
                println!("🗑️  Message revoked [id={}]", r.id);
            }
            Event::PresenceUpdate(p) => {
                println!("👤 {} is {:?}", p.jid, p.presence);
            }
            Event::GroupUpdate(g) => {
                println!("👥 {} {:?}: {:?}", g.group, g.action, g.participants);
            }
            Event::Disconnected { code, reason } => {
                println!("⚠️  Disconnected ({code}): {reason}");
            }
            Event::Reconnecting { attempt } => {
                println!("🔄 Reconnecting (attempt {attempt}) …");
            }
            Event::Reconnected => println!("✅ Reconnected"),
            Event::ReconnectFailed { attempts } => {
                eprintln!("✗ Gave up after {attempts} reconnect attempts");
                break;
            }
            Event::AuthFailure(reason) => eprintln!("✗ Authentication failed: {reason}"),
            Event::ConnectionFailed(reason) => eprintln!("✗ Connection failed: {reason}"),
            _ => {}
        }
    }

    conn.disconnect().await;
    println!("👋 Bye");
    Ok(())
}
