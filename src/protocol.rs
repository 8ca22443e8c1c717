use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::liveness::SpeakerId;

pub const PROTOCOL_VERSION: u8 = 1;

/// Speaker session (u32) + sequence number (u16), both big-endian.
pub const AUDIO_HEADER_LEN: usize = 6;

// 音频参数结构体
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u8,
    pub frame_duration_ms: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Hello {
        version: u8,
        user: String,
        audio_params: AudioParams,
    },
    Join {
        channel: String,
    },
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Hello {
        session: u32,
        #[serde(default)]
        channels: Vec<String>,
    },
    Joined {
        channel: String,
    },
    Channels {
        channels: Vec<String>,
    },
    UserLeft {
        session: u32,
    },
    Error {
        code: String,
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        channels: Vec<String>,
    },
    #[serde(other)]
    Other,
}

/// One Opus packet on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub speaker: SpeakerId,
    pub sequence: u16,
    pub payload: Bytes,
}

impl AudioPacket {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(AUDIO_HEADER_LEN + self.payload.len());
        buf.put_u32(self.speaker.0);
        buf.put_u16(self.sequence);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// `None` if the message is too short to carry a header.
    pub fn decode(mut data: Bytes) -> Option<Self> {
        if data.len() < AUDIO_HEADER_LEN {
            return None;
        }
        let speaker = SpeakerId(data.get_u32());
        let sequence = data.get_u16();
        Some(Self {
            speaker,
            sequence,
            payload: data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hello_shape() {
        let hello = ClientMessage::Hello {
            version: PROTOCOL_VERSION,
            user: "relay".into(),
            audio_params: AudioParams {
                format: "opus".into(),
                sample_rate: 48000,
                channels: 1,
                frame_duration_ms: 20,
            },
        };
        assert_eq!(
            serde_json::to_value(&hello).unwrap(),
            json!({
                "type": "hello",
                "version": 1,
                "user": "relay",
                "audio_params": {
                    "format": "opus",
                    "sample_rate": 48000,
                    "channels": 1,
                    "frame_duration_ms": 20
                }
            })
        );
    }

    #[test]
    fn join_shape() {
        let join = ClientMessage::Join {
            channel: "Lobby".into(),
        };
        assert_eq!(
            serde_json::to_string(&join).unwrap(),
            r#"{"type":"join","channel":"Lobby"}"#
        );
    }

    #[test]
    fn parses_server_messages() {
        let hello: ServerMessage =
            serde_json::from_str(r#"{"type":"hello","session":42}"#).unwrap();
        assert_eq!(
            hello,
            ServerMessage::Hello {
                session: 42,
                channels: vec![]
            }
        );

        let err: ServerMessage = serde_json::from_str(
            r#"{"type":"error","code":"channel_not_found","channels":["Lobby","Ops"]}"#,
        )
        .unwrap();
        assert_eq!(
            err,
            ServerMessage::Error {
                code: "channel_not_found".into(),
                message: None,
                channels: vec!["Lobby".into(), "Ops".into()],
            }
        );

        let left: ServerMessage =
            serde_json::from_str(r#"{"type":"user_left","session":7}"#).unwrap();
        assert_eq!(left, ServerMessage::UserLeft { session: 7 });
    }

    #[test]
    fn unknown_types_are_tolerated() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"text_message","text":"hi"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Other);
    }

    #[test]
    fn audio_header_is_big_endian() {
        let packet = AudioPacket {
            speaker: SpeakerId(0x0102_0304),
            sequence: 0x0506,
            payload: Bytes::from_static(&[0xaa, 0xbb]),
        };
        let wire = packet.encode();
        assert_eq!(&wire[..], &[1, 2, 3, 4, 5, 6, 0xaa, 0xbb]);
        assert_eq!(AudioPacket::decode(wire), Some(packet));
    }

    #[test]
    fn short_audio_message_is_rejected() {
        assert!(AudioPacket::decode(Bytes::from_static(&[0, 0, 0, 1, 0])).is_none());
    }
}
