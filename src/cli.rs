use clap::{Parser, Subcommand};

/// Preview pull requests, branches and reviews as browsable checkouts
#[derive(Parser, Debug, Clone)]
#[command(name = "sandcastle", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,

    /// Path to config file (default: sandcastle.toml, optional)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Primary repository / shared work tree
    #[arg(long, global = true)]
    pub repo_dir: Option<String>,

    /// Root directory for published castles
    #[arg(long, global = true)]
    pub castles_dir: Option<String>,

    /// Mainline branch reviews are based on (default: master)
    #[arg(long, global = true)]
    pub primary_branch: Option<String>,

    /// Seconds to wait for the work tree lock
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    /// List upstream branches, open pull requests and open reviews
    Overview,

    /// Preview a pull request
    Pull {
        /// Pull request number
        number: u64,
    },

    /// Preview a branch (`branch` on the upstream remote, or `user:branch`)
    Branch {
        /// Branch name
        name: String,
    },

    /// Apply a review's patch and preview it
    Review {
        /// Review id, with or without the leading `D`
        #[arg(value_parser = parse_review_id)]
        id: u64,
    },

    /// Browse a branch's tree
    Browse {
        /// Branch name (`branch` or `user:branch`)
        name: String,

        /// Path inside the tree
        #[arg(default_value = "")]
        path: String,
    },

    /// Print the stylesheet for rendered diffs
    Stylesheet,
}

/// Accepts `1234` or `D1234`.
pub fn parse_review_id(raw: &str) -> Result<u64, String> {
    let digits = raw.strip_prefix('D').unwrap_or(raw);
    digits
        .parse::<u64>()
        .map_err(|_| format!("invalid review id: {raw} (expected 1234 or D1234)"))
}
