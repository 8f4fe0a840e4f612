//! Who may drive a running player.
//!
//! The session owner, server administrators and global bot administrators
//! always may. Anyone may like the current track (the like goes to their
//! own catalog account). Everyone else needs the server's public control
//! mode and has to be listening in the same voice channel.

use std::fmt;

use serenity::model::id::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Pause,
    Resume,
    Skip,
    Previous,
    Stop,
    Like,
}

impl Action {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(Action::Pause),
            "resume" | "play" => Some(Action::Resume),
            "skip" | "next" => Some(Action::Skip),
            "previous" | "prev" | "back" => Some(Action::Previous),
            "stop" => Some(Action::Stop),
            "like" => Some(Action::Like),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Skip => "skip",
            Action::Previous => "previous",
            Action::Stop => "stop",
            Action::Like => "like",
        }
    }
}

/// Everything the decision needs, gathered by the caller.
#[derive(Clone, Copy, Debug)]
pub struct AccessRequest {
    pub requester: UserId,
    pub owner: UserId,
    pub public_control: bool,
    pub server_admin: bool,
    pub global_admin: bool,
    pub same_channel: bool,
    pub action: Action,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Denial {
    /// Only the owner and admins may control the player.
    PublicModeOff,
    /// Public control is on, but the requester isn't listening.
    NotInChannel,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::PublicModeOff => {
                f.write_str("only the user who started the player (or an admin) can control it")
            }
            Denial::NotInChannel => {
                f.write_str("join the player's voice channel to control it")
            }
        }
    }
}

pub fn authorize(req: &AccessRequest) -> Result<(), Denial> {
    if req.requester == req.owner
        || req.action == Action::Like
        || req.global_admin
        || req.server_admin
    {
        return Ok(());
    }

    match (req.public_control, req.same_channel) {
        (true, true) => Ok(()),
        (true, false) => Err(Denial::NotInChannel),
        (false, _) => Err(Denial::PublicModeOff),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: UserId = UserId::new(1);
    const OTHER: UserId = UserId::new(2);

    fn req(requester: UserId, action: Action) -> AccessRequest {
        AccessRequest {
            requester,
            owner: OWNER,
            public_control: false,
            server_admin: false,
            global_admin: false,
            same_channel: false,
            action,
        }
    }

    #[test]
    fn owner_controls_everything() {
        for action in [
            Action::Pause,
            Action::Resume,
            Action::Skip,
            Action::Previous,
            Action::Stop,
            Action::Like,
        ] {
            assert_eq!(authorize(&req(OWNER, action)), Ok(()));
        }
    }

    #[test]
    fn private_mode_matrix() {
        assert_eq!(
            authorize(&req(OTHER, Action::Pause)),
            Err(Denial::PublicModeOff)
        );
        assert_eq!(
            authorize(&AccessRequest {
                same_channel: true,
                ..req(OTHER, Action::Skip)
            }),
            Err(Denial::PublicModeOff)
        );
        assert_eq!(
            authorize(&AccessRequest {
                server_admin: true,
                ..req(OTHER, Action::Pause)
            }),
            Ok(())
        );
        assert_eq!(
            authorize(&AccessRequest {
                global_admin: true,
                ..req(OTHER, Action::Stop)
            }),
            Ok(())
        );
        assert_eq!(authorize(&req(OTHER, Action::Like)), Ok(()));
    }

    #[test]
    fn public_mode_needs_same_channel() {
        let public = AccessRequest {
            public_control: true,
            ..req(OTHER, Action::Pause)
        };
        assert_eq!(authorize(&public), Err(Denial::NotInChannel));
        assert_eq!(
            authorize(&AccessRequest {
                same_channel: true,
                ..public
            }),
            Ok(())
        );
    }

    #[test]
    fn parses_button_actions() {
        assert_eq!(Action::parse("next"), Some(Action::Skip));
        assert_eq!(Action::parse("play"), Some(Action::Resume));
        assert_eq!(Action::parse("volume"), None);
        assert_eq!(Action::parse(Action::Previous.as_str()), Some(Action::Previous));
    }
}
