use prefork::common::buffer::Buffer;
use prefork::common::logger;
use prefork::core::net::TcpConnection;
use prefork::{ConfigLoader, TcpServer};
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <config_file>", args[0]);
        std::process::exit(1);
    }

    let config_path = &args[1];
    let config = match ConfigLoader::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error parsing config file: {}", e);
            std::process::exit(1);
        }
    };

    logger::init(&config.log_level);

    let mut server = match TcpServer::new(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Error creating server");
            std::process::exit(1);
        }
    };

    // Echo every byte back to its sender.
    server.set_message_callback(|conn: &mut TcpConnection, buf: &mut Buffer| {
        let bytes = buf.retrieve_all();
        conn.send(&bytes);
    });

    if let Err(e) = server.serve() {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
