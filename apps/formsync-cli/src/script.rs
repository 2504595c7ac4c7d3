//! JSON-lines replay scripts.
//!
//! Every non-blank line is either a server message (tagged with `"t"`) or a
//! directive (tagged with `"do"`) that stages the headless simulation or
//! advances time.

use anyhow::Context;
use formsync_common::FormId;
use formsync_engine::Message;
use formsync_sim::BaseType;
use glam::Vec3;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Directive(Directive),
    Message(Box<Message>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "do", rename_all = "camelCase")]
pub enum Directive {
    /// Run frames for this much simulated time.
    Wait { secs: f32 },
    Connect,
    Disconnect,
    Spawn {
        id: FormId,
        #[serde(rename = "baseType", default)]
        base_type: BaseType,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        pos: Vec3,
    },
    SpawnPlayer {
        id: FormId,
        #[serde(default)]
        pos: Vec3,
    },
    Despawn { id: FormId },
    /// Attach a world-model slot to a live object.
    BindView { slot: usize, id: FormId },
}

/// Parse a whole script. Errors name the offending line.
pub fn parse(source: &str) -> anyhow::Result<Vec<Step>> {
    source
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("script line {}", n + 1))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_and_directives_mix() {
        let steps = parse(
            r#"{"do":"spawnPlayer","id":20,"pos":[1.0,2.0,3.0]}

{"t":"hostStart","target":4278190081}
{"do":"wait","secs":1.5}
"#,
        )
        .unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[0],
            Step::Directive(Directive::SpawnPlayer {
                id: FormId(0x14),
                pos: Vec3::new(1.0, 2.0, 3.0),
            })
        );
        assert!(matches!(&steps[1], Step::Message(m) if m.kind() == "hostStart"));
        assert_eq!(steps[2], Step::Directive(Directive::Wait { secs: 1.5 }));
    }

    #[test]
    fn spawn_defaults() {
        let steps = parse(r#"{"do":"spawn","id":128013,"baseType":"Container"}"#).unwrap();
        assert_eq!(
            steps[0],
            Step::Directive(Directive::Spawn {
                id: FormId(0x1f40d),
                base_type: BaseType::Container,
                name: None,
                pos: Vec3::ZERO,
            })
        );
    }

    #[test]
    fn bad_line_is_reported_with_its_number() {
        let err = parse("{\"do\":\"connect\"}\n{\"t\":\"nope\"}\n").unwrap_err();
        assert!(format!("{err}").contains("line 2"));
    }
}
