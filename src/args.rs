use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    /// Whether quizd's clients connect to it over https.
    /// If so, the session cookie is sent as a secure cookie.
    #[arg(short, long)]
    secure: bool,

    /// The address quizd should listen on. By default
    /// quizd will listen just on the IPv4 loopback.
    #[arg(short, long)]
    address: Option<String>,

    /// The port quizd listens on.
    #[arg(short, long, default_value_t = 4000)]
    port: u16,

    /// Directory holding the sqlite database.
    #[arg(short, long, default_value = ".")]
    data_dir: PathBuf,

    /// Secret used to sign session tokens.
    #[arg(long, env = "QUIZD_SESSION_SECRET", hide_env_values = true)]
    session_secret: String,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn session_secret(&self) -> &str {
        &self.session_secret
    }
}
