//! Follower broadcast derived from the leader's command.
//!
//! A pure transform: followers copy the leader's verb and magnitude, except
//! that a narrow passage forces everyone into single-file slow motion.

use crawler_types::{Command, CommandMessage, CommandVerb, GroupMessage};

/// Speed cap for followers while the leader reports a narrow passage.
pub const NARROW_FOLLOW_SPEED: f32 = 0.3;

/// Build the group message for `followers`. Returns `None` when there is
/// nobody to follow.
pub fn derive_group(leader: &Command, followers: &[String]) -> Option<GroupMessage> {
    if followers.is_empty() {
        return None;
    }
    let (verb, magnitude) = if leader.is_narrow && leader.verb != CommandVerb::Stop {
        (CommandVerb::SlowForward, leader.magnitude.min(NARROW_FOLLOW_SPEED))
    } else {
        (leader.verb, leader.magnitude)
    };
    let cmds = followers
        .iter()
        .map(|id| {
            let mut follower = Command::new(id.clone(), verb, magnitude, leader.angle).narrow(leader.is_narrow);
            follower.timestamp = leader.timestamp;
            CommandMessage::from(&follower)
        })
        .collect();
    Some(GroupMessage {
        robot_leader_id: leader.target_id.clone(),
        cmds,
        time_stamp: leader.timestamp,
    })
}
