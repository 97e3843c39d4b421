use clap::{Parser, Subcommand};

/// Publish keyed messages over HTTP and consume them with a consumer-group listener.
#[derive(Parser, Debug)]
#[command(name = "courier", version, about)]
pub struct Cli {
    /// Config profile; `{PROFILE}_{KEY}` env vars win over `{KEY}`.
    #[arg(long, global = true, env = "COURIER_PROFILE")]
    pub profile: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP publisher.
    Serve {
        /// Also run the listener in this process (needed with the memory backend).
        #[arg(long)]
        with_listener: bool,
    },

    /// Run only the listener until SIGINT/SIGTERM.
    Listen,

    /// Publish one message and exit.
    Send {
        /// Record key (may be empty).
        #[arg(long, default_value = "")]
        key: String,

        /// Payload, sent as UTF-8 bytes.
        payload: String,
    },
}
