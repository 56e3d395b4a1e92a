use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Workshop bot commands:")]
pub enum Command {
    #[command(description = "Display this help message")]
    Help,
    #[command(description = "Register, or see your registration status")]
    Start,
    #[command(description = "Cancel the current registration")]
    Cancel,
    #[command(description = "Open the lessons menu")]
    Lessons,
    #[command(description = "Show your course progress")]
    Progress,
    #[command(description = "List registrations awaiting review (admins only)")]
    Pending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_known_commands() {
        assert_eq!(Command::parse("/start", "workshop_bot").ok(), Some(Command::Start));
        assert_eq!(Command::parse("/cancel", "workshop_bot").ok(), Some(Command::Cancel));
        assert_eq!(
            Command::parse("/lessons@workshop_bot", "workshop_bot").ok(),
            Some(Command::Lessons)
        );
        assert!(Command::parse("/schedule", "workshop_bot").is_err());
    }

    #[test]
    fn test_descriptions_list_every_command() {
        let help = Command::descriptions().to_string();
        for name in ["/start", "/cancel", "/lessons", "/progress", "/pending", "/help"] {
            assert!(help.contains(name), "missing {name}");
        }
    }
}
