//! Line-mode input parsing.

use std::path::PathBuf;

use parley_control::SearchPolicy;
use parley_core::SessionId;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text to send.
    Send(String),
    /// `/stop`
    Stop,
    /// `/new`
    NewDraft,
    /// `/open <session-id>`
    Open(SessionId),
    /// `/reload`
    Reload,
    /// `/attach <path>...`
    Attach(Vec<PathBuf>),
    /// `/lib <name>`
    Library(String),
    /// `/search <auto|always|never>`
    Search(SearchPolicy),
    /// `/help`
    Help,
    /// `/quit`
    Quit,
}

/// Usage text for the line-mode front-end.
pub const HELP: &str = "\
Type a message and press Enter to send it.
  /stop              stop the current response
  /new               start a new conversation
  /open <session>    open an existing conversation
  /reload            reload the conversation history
  /attach <path>...  upload files for the next message
  /lib <name>        add a library to the search context
  /search <policy>   set the search policy (auto, always, never)
  /quit              exit";

impl Command {
    /// Parse a line of input.
    ///
    /// # Errors
    ///
    /// Returns a message suitable for the user if a command is unknown or
    /// its arguments are invalid.
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Self::Send(line.to_string()));
        };

        let (name, args) = rest
            .split_once(char::is_whitespace)
            .map_or((rest, ""), |(name, args)| (name, args.trim()));

        match name {
            "stop" => Ok(Self::Stop),
            "new" => Ok(Self::NewDraft),
            "reload" => Ok(Self::Reload),
            "help" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            "open" => SessionId::new(args)
                .map(Self::Open)
                .map_err(|_| "usage: /open <session-id>".to_string()),
            "attach" => {
                let paths: Vec<PathBuf> = args.split_whitespace().map(PathBuf::from).collect();
                if paths.is_empty() {
                    Err("usage: /attach <path>...".to_string())
                } else {
                    Ok(Self::Attach(paths))
                }
            }
            "lib" if !args.is_empty() => Ok(Self::Library(args.to_string())),
            "lib" => Err("usage: /lib <name>".to_string()),
            "search" => args.parse().map(Self::Search),
            other => Err(format!("unknown command /{other} (try /help)")),
        }
    }
}
