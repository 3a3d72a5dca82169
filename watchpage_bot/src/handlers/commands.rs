use teloxide::types::BotCommand;

pub const COMMANDS: &[Command] = &[
    START,
    HELP,
    STATS,
    SYNCPAGES,
    REINDEX,
    RETITLE,
    THUMB,
    TITLES,
    ADDTITLE,
    REMOVETITLE,
    BLUR,
    GALLERY,
];

pub struct Command {
    pub callname: &'static str,
    pub description: &'static str,
    hidden: bool,
}

impl Command {
    pub fn is_matching_callname(&self, command: &str) -> bool {
        self.callname
            .split_ascii_whitespace()
            .next()
            .is_some_and(|x| x.eq_ignore_ascii_case(command))
    }

    pub fn get_help(&self, mut output: impl std::fmt::Write) -> Result<(), std::fmt::Error> {
        output.write_str(self.callname)?;
        if !self.description.is_empty() {
            output.write_str(" - ")?;
            output.write_str(self.description)?;
        }
        Ok(())
    }

    pub fn generate_help() -> String {
        let mut response = String::from(concat!(
            "Send me a video, or a link to one, and I'll publish a watch page for it. ",
            "A caption becomes the title.\n\n"
        ));
        for command in COMMANDS {
            if command.hidden {
                continue;
            }
            // Writing into a String can't fail.
            let _ = command.get_help(&mut response);
            response += "\n\n";
        }
        response.truncate(response.trim_end().len());
        response
    }

    pub fn generate_bot_commands() -> Vec<BotCommand> {
        let mut output = Vec::new();

        for command in COMMANDS {
            if command.hidden {
                continue;
            }
            let Some(callname) = command.callname.split_ascii_whitespace().next() else {
                continue;
            };

            // Cut off the /
            let callname = callname[1..].trim().to_string();

            output.push(BotCommand {
                command: callname,
                description: command.description.to_string(),
            });
        }

        output
    }
}

const START: Command = Command {
    callname: "/start",
    description: "Say hi",
    hidden: true,
};

const HELP: Command = Command {
    callname: "/help",
    description: "Show what this bot can do",
    hidden: false,
};

const STATS: Command = Command {
    callname: "/stats",
    description: "Count the indexed videos",
    hidden: false,
};

const SYNCPAGES: Command = Command {
    callname: "/syncpages",
    description: "Publish pages for indexed videos that have none",
    hidden: false,
};

const REINDEX: Command = Command {
    callname: "/reindex",
    description: "Drop duplicate index entries and tidy up source references",
    hidden: false,
};

const RETITLE: Command = Command {
    callname: "/retitle <id> <title>",
    description: "Give a video a new title and republish its pages",
    hidden: false,
};

const THUMB: Command = Command {
    callname: "/thumb <id>",
    description: "Use as a photo caption to make that photo the video's thumbnail",
    hidden: false,
};

const TITLES: Command = Command {
    callname: "/titles",
    description: "List the titles given to videos sent without one",
    hidden: false,
};

const ADDTITLE: Command = Command {
    callname: "/addtitle <title>",
    description: "Add a title to the pool",
    hidden: false,
};

const REMOVETITLE: Command = Command {
    callname: "/removetitle [number]",
    description: "Remove a title from the pool, the last one if no number is given",
    hidden: false,
};

const BLUR: Command = Command {
    callname: "/blur [strength]",
    description: "Show or set how strongly safe thumbnails are blurred",
    hidden: false,
};

const GALLERY: Command = Command {
    callname: "/gallery",
    description: "Republish the page listing every video",
    hidden: false,
};

/// A command sent to the bot, with its parameters picked apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Request<'a> {
    Start,
    Help,
    Stats,
    SyncPages,
    Reindex,
    Retitle { video_id: &'a str, title: &'a str },
    Thumb { video_id: &'a str },
    Titles,
    AddTitle { title: &'a str },
    RemoveTitle { position: Option<usize> },
    Blur { sigma: Option<f64> },
    Gallery,
    /// A known command with parameters that make no sense. Holds its usage line.
    Usage(&'static str),
    Unknown(&'a str),
}

/// Split `/command@botname params` into the callname and the parameters.
///
/// Returns [`None`] if this isn't a command, or if it's addressed to some other bot.
pub fn split_command<'a>(text: &'a str, bot_username: &str) -> Option<(&'a str, &'a str)> {
    let text = text.trim_start();
    if !text.starts_with('/') {
        return None;
    }

    let command = text.split_whitespace().next()?;
    if !command.is_ascii() {
        // Telegram commands must be ASCII.
        return None;
    }
    let params = text[command.len()..].trim();

    let callname = match command.find('@') {
        Some(username_start) => {
            // Bot names are ASCII, so ignore ASCII case specifically.
            if !command[username_start + '@'.len_utf8()..].eq_ignore_ascii_case(bot_username) {
                return None;
            }
            &command[..username_start]
        }
        None => command,
    };

    Some((callname, params))
}

/// Parse a command message. See [`split_command`] for when this returns [`None`].
pub fn parse_request<'a>(text: &'a str, bot_username: &str) -> Option<Request<'a>> {
    let (callname, params) = split_command(text, bot_username)?;

    let request = if START.is_matching_callname(callname) {
        Request::Start
    } else if HELP.is_matching_callname(callname) {
        Request::Help
    } else if STATS.is_matching_callname(callname) {
        Request::Stats
    } else if SYNCPAGES.is_matching_callname(callname) {
        Request::SyncPages
    } else if REINDEX.is_matching_callname(callname) {
        Request::Reindex
    } else if RETITLE.is_matching_callname(callname) {
        match params.split_once(char::is_whitespace) {
            Some((video_id, title)) if !title.trim().is_empty() => Request::Retitle {
                video_id,
                title: title.trim(),
            },
            _ => Request::Usage(RETITLE.callname),
        }
    } else if THUMB.is_matching_callname(callname) {
        let mut words = params.split_whitespace();
        match (words.next(), words.next()) {
            (Some(video_id), None) => Request::Thumb { video_id },
            _ => Request::Usage(THUMB.callname),
        }
    } else if TITLES.is_matching_callname(callname) {
        Request::Titles
    } else if ADDTITLE.is_matching_callname(callname) {
        if params.is_empty() {
            Request::Usage(ADDTITLE.callname)
        } else {
            Request::AddTitle { title: params }
        }
    } else if REMOVETITLE.is_matching_callname(callname) {
        if params.is_empty() {
            Request::RemoveTitle { position: None }
        } else {
            match params.parse() {
                Ok(position) => Request::RemoveTitle {
                    position: Some(position),
                },
                Err(_) => Request::Usage(REMOVETITLE.callname),
            }
        }
    } else if BLUR.is_matching_callname(callname) {
        if params.is_empty() {
            Request::Blur { sigma: None }
        } else {
            match params.parse() {
                Ok(sigma) => Request::Blur { sigma: Some(sigma) },
                Err(_) => Request::Usage(BLUR.callname),
            }
        }
    } else if GALLERY.is_matching_callname(callname) {
        Request::Gallery
    } else {
        Request::Unknown(callname)
    };

    Some(request)
}

/// Find the first http(s) link in a message. Whatever else was written
/// around it is returned too, as a title.
pub fn find_link(text: &str) -> Option<(&str, Option<String>)> {
    let link = text.split_whitespace().find(|word| {
        let lowercase = word.to_ascii_lowercase();
        lowercase.starts_with("http://") || lowercase.starts_with("https://")
    })?;

    let rest: Vec<&str> = text.split_whitespace().filter(|word| *word != link).collect();
    let title = (!rest.is_empty()).then(|| rest.join(" "));

    Some((link, title))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_bot_commands() {
        let commands = Command::generate_bot_commands();
        // "At most 100 commands can be specified"
        // - https://core.telegram.org/bots/api#setmycommands
        assert!(commands.len() <= 100);
        #[allow(clippy::len_zero)]
        for command in commands {
            // Everything here is from https://core.telegram.org/bots/api#botcommand
            // "Text of the command; 1-32 characters."
            assert!(command.command.len() >= 1);
            assert!(command.command.len() <= 32);

            // "Can contain only lowercase English letters, digits and underscores."
            for chr in command.command.chars() {
                let is_lowercase_latin = chr.is_ascii_alphabetic() && chr.is_ascii_lowercase();
                let is_digit = chr.is_ascii_digit();
                let is_underscore = chr == '_';

                assert!(is_lowercase_latin || is_digit || is_underscore);
            }

            // "Description of the command; 1-256 characters."
            assert!(command.description.len() >= 1);
            assert!(command.description.len() <= 256);
        }
    }

    #[test]
    fn help_lists_visible_commands() {
        let help = Command::generate_help();
        assert!(help.contains("/retitle <id> <title> - "));
        assert!(help.contains("/syncpages"));
        assert!(!help.contains("/start"));
        assert!(!help.ends_with('\n'));
    }

    #[test]
    fn commands_addressed_to_us_only() {
        assert_eq!(split_command("/stats", "WatchBot"), Some(("/stats", "")));
        assert_eq!(
            split_command("/stats@watchbot  now ", "WatchBot"),
            Some(("/stats", "now"))
        );
        assert_eq!(split_command("/stats@OtherBot", "WatchBot"), None);
        assert_eq!(split_command("stats", "WatchBot"), None);
        assert_eq!(split_command("/статы", "WatchBot"), None);
    }

    #[test]
    fn parses_requests() {
        assert_eq!(parse_request("/HELP", "b"), Some(Request::Help));
        assert_eq!(parse_request("/syncpages@b", "b"), Some(Request::SyncPages));
        assert_eq!(
            parse_request("/retitle abc123   A brand new title ", "b"),
            Some(Request::Retitle {
                video_id: "abc123",
                title: "A brand new title"
            })
        );
        assert_eq!(
            parse_request("/retitle abc123", "b"),
            Some(Request::Usage("/retitle <id> <title>"))
        );
        assert_eq!(
            parse_request("/thumb abc123", "b"),
            Some(Request::Thumb { video_id: "abc123" })
        );
        assert_eq!(
            parse_request("/thumb", "b"),
            Some(Request::Usage("/thumb <id>"))
        );
        assert_eq!(parse_request("/titles", "b"), Some(Request::Titles));
        assert_eq!(
            parse_request("/addtitle  Late night special ", "b"),
            Some(Request::AddTitle {
                title: "Late night special"
            })
        );
        assert_eq!(
            parse_request("/addtitle", "b"),
            Some(Request::Usage("/addtitle <title>"))
        );
        assert_eq!(
            parse_request("/removetitle", "b"),
            Some(Request::RemoveTitle { position: None })
        );
        assert_eq!(
            parse_request("/removetitle 2", "b"),
            Some(Request::RemoveTitle { position: Some(2) })
        );
        assert_eq!(
            parse_request("/removetitle two", "b"),
            Some(Request::Usage("/removetitle [number]"))
        );
        assert_eq!(parse_request("/blur", "b"), Some(Request::Blur { sigma: None }));
        assert_eq!(
            parse_request("/blur 12.5", "b"),
            Some(Request::Blur { sigma: Some(12.5) })
        );
        assert_eq!(
            parse_request("/blur lots", "b"),
            Some(Request::Usage("/blur [strength]"))
        );
        assert_eq!(parse_request("/gallery", "b"), Some(Request::Gallery));
        assert_eq!(parse_request("/dance", "b"), Some(Request::Unknown("/dance")));
        assert_eq!(parse_request("hello", "b"), None);
    }

    #[test]
    fn finds_links() {
        assert_eq!(
            find_link("https://example.com/v.mp4"),
            Some(("https://example.com/v.mp4", None))
        );
        assert_eq!(
            find_link("look at this HTTP://example.com/a cool one"),
            Some((
                "HTTP://example.com/a",
                Some("look at this cool one".to_string())
            ))
        );
        assert_eq!(find_link("ftp://example.com/v.mp4"), None);
        assert_eq!(find_link("no links here"), None);
    }
}
