//! Wire messages published per tick.
//!
//! Payloads are fixed-field records; the `cmd` field is the closed
//! [`CommandVerb`] enum so an unknown verb fails deserialization outright.
//! Call `validate` on anything that arrives from outside before trusting it.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Command, CommandVerb, CrawlerError};

/// Command message as published for a single robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CommandMessage {
    #[serde(rename = "robotId")]
    pub robot_id: String,
    pub cmd: CommandVerb,
    /// Magnitudes in `[0, 1]`; the steering stack always sends one value.
    pub value: Vec<f32>,
    pub angle: i32,
    pub is_narrow: bool,
    #[serde(rename = "timeStamp")]
    pub time_stamp: DateTime<Utc>,
}

impl CommandMessage {
    /// Check field-level invariants.
    ///
    /// # Errors
    ///
    /// [`CrawlerError::InvalidMessage`] when the robot id is blank, `value`
    /// is empty, or any value is non-finite or outside `[0, 1]`.
    pub fn validate(&self) -> Result<(), CrawlerError> {
        if self.robot_id.trim().is_empty() {
            return Err(CrawlerError::InvalidMessage("robotId must not be empty".to_string()));
        }
        if self.value.is_empty() {
            return Err(CrawlerError::InvalidMessage("value must carry at least one entry".to_string()));
        }
        if let Some(bad) = self
            .value
            .iter()
            .find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0)
        {
            return Err(CrawlerError::InvalidMessage(format!(
                "value {bad} outside [0, 1]"
            )));
        }
        Ok(())
    }

    /// Parse and validate a JSON payload.
    pub fn from_json(raw: &str) -> Result<Self, CrawlerError> {
        let msg: Self =
            serde_json::from_str(raw).map_err(|e| CrawlerError::InvalidMessage(e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }

    pub fn to_json(&self) -> Result<String, CrawlerError> {
        serde_json::to_string(self).map_err(|e| CrawlerError::Serialization(e.to_string()))
    }
}

impl From<&Command> for CommandMessage {
    fn from(cmd: &Command) -> Self {
        Self {
            robot_id: cmd.target_id.clone(),
            cmd: cmd.verb,
            value: vec![cmd.magnitude],
            angle: cmd.angle,
            is_narrow: cmd.is_narrow,
            time_stamp: cmd.timestamp,
        }
    }
}

impl TryFrom<CommandMessage> for Command {
    type Error = CrawlerError;

    fn try_from(msg: CommandMessage) -> Result<Self, Self::Error> {
        msg.validate()?;
        Ok(Command {
            target_id: msg.robot_id,
            verb: msg.cmd,
            magnitude: msg.value[0],
            angle: msg.angle,
            is_narrow: msg.is_narrow,
            timestamp: msg.time_stamp,
        })
    }
}

/// Group/broadcast message fanning the leader's decision out to followers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GroupMessage {
    #[serde(rename = "robotLeaderId")]
    pub robot_leader_id: String,
    pub cmds: Vec<CommandMessage>,
    #[serde(rename = "timeStamp")]
    pub time_stamp: DateTime<Utc>,
}

impl GroupMessage {
    pub fn validate(&self) -> Result<(), CrawlerError> {
        if self.robot_leader_id.trim().is_empty() {
            return Err(CrawlerError::InvalidMessage(
                "robotLeaderId must not be empty".to_string(),
            ));
        }
        self.cmds.iter().try_for_each(CommandMessage::validate)
    }

    pub fn from_json(raw: &str) -> Result<Self, CrawlerError> {
        let msg: Self =
            serde_json::from_str(raw).map_err(|e| CrawlerError::InvalidMessage(e.to_string()))?;
        msg.validate()?;
        Ok(msg)
    }

    pub fn to_json(&self) -> Result<String, CrawlerError> {
        serde_json::to_string(self).map_err(|e| CrawlerError::Serialization(e.to_string()))
    }
}

/// JSON Schemas of both wire messages, keyed by message name.
pub fn wire_schemas() -> Vec<(&'static str, schemars::schema::RootSchema)> {
    vec![
        ("command", schemars::schema_for!(CommandMessage)),
        ("group", schemars::schema_for!(GroupMessage)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CommandMessage {
        CommandMessage::from(&Command::new("LEADER-01", CommandVerb::Left, 0.7, -10))
    }

    #[test]
    fn command_message_uses_wire_field_names() {
        let json = sample().to_json().unwrap();
        assert!(json.contains("\"robotId\":\"LEADER-01\""));
        assert!(json.contains("\"cmd\":\"left\""));
        assert!(json.contains("\"value\":[0.7]"));
        assert!(json.contains("\"angle\":-10"));
        assert!(json.contains("\"is_narrow\":false"));
        assert!(json.contains("\"timeStamp\":\""));
    }

    #[test]
    fn timestamp_is_iso8601() {
        let raw = r#"{"robotId":"r1","cmd":"forward","value":[0.5],"angle":0,"is_narrow":false,"timeStamp":"2025-12-24T18:15:00Z"}"#;
        let msg = CommandMessage::from_json(raw).unwrap();
        assert_eq!(msg.time_stamp.to_rfc3339(), "2025-12-24T18:15:00+00:00");
    }

    #[test]
    fn validation_rejects_out_of_range_value() {
        let mut msg = sample();
        msg.value = vec![1.5];
        assert!(matches!(msg.validate(), Err(CrawlerError::InvalidMessage(_))));
        msg.value = Vec::new();
        assert!(msg.validate().is_err());
        msg.value = vec![f32::NAN];
        assert!(msg.validate().is_err());
    }

    #[test]
    fn validation_rejects_blank_robot_id() {
        let mut msg = sample();
        msg.robot_id = "  ".to_string();
        assert!(msg.validate().is_err());
    }

    #[test]
    fn from_json_rejects_unknown_verb() {
        let raw = r#"{"robotId":"r1","cmd":"rotate","value":[0.5],"angle":0,"is_narrow":false,"timeStamp":"2025-12-24T18:15:00Z"}"#;
        assert!(matches!(
            CommandMessage::from_json(raw),
            Err(CrawlerError::InvalidMessage(_))
        ));
    }

    #[test]
    fn message_converts_back_to_command() {
        let cmd = Command::new("r2", CommandVerb::SlowForward, 0.3, 0).narrow(true);
        let back = Command::try_from(CommandMessage::from(&cmd)).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn group_validation_checks_every_command() {
        let mut bad = sample();
        bad.value = vec![2.0];
        let group = GroupMessage {
            robot_leader_id: "LEADER-01".to_string(),
            cmds: vec![sample(), bad],
            time_stamp: Utc::now(),
        };
        assert!(group.validate().is_err());
    }

    #[test]
    fn group_json_uses_wire_field_names() {
        let group = GroupMessage {
            robot_leader_id: "LEADER-01".to_string(),
            cmds: vec![sample()],
            time_stamp: Utc::now(),
        };
        let json = group.to_json().unwrap();
        assert!(json.contains("\"robotLeaderId\":\"LEADER-01\""));
        assert!(json.contains("\"cmds\":[{"));
        assert_eq!(GroupMessage::from_json(&json).unwrap(), group);
    }

    #[test]
    fn schemas_name_both_messages() {
        let schemas = wire_schemas();
        let names: Vec<_> = schemas.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["command", "group"]);
        let json = serde_json::to_string(&schemas[0].1).unwrap();
        assert!(json.contains("robotId"));
    }
}
