use clap::{Parser, Subcommand};
use uuid::Uuid;

/// reportq: report storage and notification dispatch queue
#[derive(Parser, Debug)]
#[command(name = "reportq", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server and the recovery job
    Serve {
        /// Port to bind (defaults to PORT from the environment)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run one recovery sweep over stuck notifications and exit
    Sweep,

    /// Inspect or enqueue notifications
    Notification {
        #[command(subcommand)]
        command: NotificationCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum NotificationCommands {
    /// List every notification for a user
    List {
        #[arg(long)]
        user_id: Uuid,
    },
    /// Enqueue a literal-text notification
    Enqueue {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        sender_method: String,
        #[arg(long)]
        text: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["reportq"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_enqueue() {
        let cli = Cli::try_parse_from([
            "reportq",
            "notification",
            "enqueue",
            "--user-id",
            "6f1c1f3e-63b4-4c1c-9a3e-0f6a3c1b2d4e",
            "--sender-method",
            "telegram",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Notification {
                command: NotificationCommands::Enqueue { sender_method, text, .. },
            }) => {
                assert_eq!(sender_method, "telegram");
                assert!(text.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_bad_user_id_rejected() {
        assert!(Cli::try_parse_from(["reportq", "notification", "list", "--user-id", "nope"]).is_err());
    }
}
