//! Supervisor-facing control-token grammar.
//!
//! Tokens are UTF-8 text: either the literal [`STOP_TOKEN`] or
//! `cmd:cmd_id:params` with exactly three colon-separated fields, where
//! `params` is empty or a `-`-separated list. The textual protocol is the
//! Supervisor contract and is preserved as-is; everything behind this module
//! works on the parsed form.

use std::str::FromStr;

use thiserror::Error;

use dyskt_nic::Channel;

/// Out-of-band stop request.
pub const STOP_TOKEN: &str = "!STOP!";

/// A parsed control token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Stop,
    Cmd(Cmd),
}

/// A `cmd:cmd_id:params` token. The command name is kept verbatim so the
/// tuner can report unknown commands back with their correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub name: String,
    pub cmd_id: i32,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid command format")]
    Format,
    #[error("invalid param format")]
    Params,
}

impl FromStr for Token {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == STOP_TOKEN {
            return Ok(Token::Stop);
        }
        let fields: Vec<&str> = s.split(':').collect();
        let [name, cmd_id, params] = fields.as_slice() else {
            return Err(TokenError::Format);
        };
        let cmd_id: i32 = cmd_id.parse().map_err(|_| TokenError::Format)?;
        let params = if params.is_empty() {
            Vec::new()
        } else {
            params.split('-').map(str::to_string).collect()
        };
        Ok(Token::Cmd(Cmd {
            name: name.to_string(),
            cmd_id,
            params,
        }))
    }
}

/// Interprets `listen` parameters, `"<ch>-<width>"` on the wire, which the
/// token parser has already split on `-`.
pub fn listen_channel(params: &[String]) -> Result<Channel, TokenError> {
    let [ch, width] = params else {
        return Err(TokenError::Params);
    };
    let ch: u16 = ch.parse().map_err(|_| TokenError::Params)?;
    let width = width.parse().map_err(|_| TokenError::Params)?;
    Ok(Channel::new(ch, width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dyskt_nic::ChannelWidth;

    #[test]
    fn stop_literal() {
        assert_eq!("!STOP!".parse::<Token>(), Ok(Token::Stop));
    }

    #[test]
    fn command_with_empty_params() {
        let token = "scan:7:".parse::<Token>().unwrap();
        assert_eq!(
            token,
            Token::Cmd(Cmd {
                name: "scan".to_string(),
                cmd_id: 7,
                params: vec![],
            })
        );
    }

    #[test]
    fn command_with_param_list() {
        let token = "listen:3:11-HT20".parse::<Token>().unwrap();
        let Token::Cmd(cmd) = token else {
            panic!("expected a command");
        };
        assert_eq!(cmd.cmd_id, 3);
        assert_eq!(cmd.params, vec!["11", "HT20"]);
        assert_eq!(
            listen_channel(&cmd.params),
            Ok(Channel::new(11, ChannelWidth::Ht20))
        );
    }

    #[test]
    fn malformed_tokens() {
        assert_eq!("noColons".parse::<Token>(), Err(TokenError::Format));
        assert_eq!("a:b".parse::<Token>(), Err(TokenError::Format));
        assert_eq!("a:1:p:q".parse::<Token>(), Err(TokenError::Format));
        assert_eq!("scan:seven:".parse::<Token>(), Err(TokenError::Format));
    }

    #[test]
    fn unknown_commands_still_parse() {
        let token = "foo:9:x".parse::<Token>().unwrap();
        let Token::Cmd(cmd) = token else {
            panic!("expected a command");
        };
        assert_eq!(cmd.name, "foo");
        assert_eq!(cmd.cmd_id, 9);
        assert_eq!(cmd.params, vec!["x"]);
    }

    #[test]
    fn listen_param_errors() {
        let bad = ["banana".to_string()];
        assert_eq!(listen_channel(&bad), Err(TokenError::Params));
        let bad = ["11".to_string(), "HT99".to_string()];
        assert_eq!(listen_channel(&bad), Err(TokenError::Params));
        let bad = ["eleven".to_string(), "HT20".to_string()];
        assert_eq!(listen_channel(&bad), Err(TokenError::Params));
    }
}
