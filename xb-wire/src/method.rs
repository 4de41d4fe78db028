use std::fmt;
use std::str::FromStr;

use crate::error::FrameError;

/// One of the method names carried in a [`crate::Frame`] header (§3, §6.1).
///
/// `Update`/`UpdateOneway` only ever appear on inbound (broker → client)
/// frames; every other variant is client → broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Connect,
    Disconnect,
    Publish,
    PublishArr,
    PublishOneway,
    Subscribe,
    UnSubscribe,
    Erase,
    Get,
    Ping,
    Update,
    UpdateOneway,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Connect => "connect",
            Method::Disconnect => "disconnect",
            Method::Publish => "publish",
            Method::PublishArr => "publishArr",
            Method::PublishOneway => "publishOneway",
            Method::Subscribe => "subscribe",
            Method::UnSubscribe => "unSubscribe",
            Method::Erase => "erase",
            Method::Get => "get",
            Method::Ping => "ping",
            Method::Update => "update",
            Method::UpdateOneway => "updateOneway",
        }
    }

    /// Derived oneway-ness of an *invocation* using this method (§3:
    /// "oneway: derived — true for publishOneway, update-oneway, and for
    /// the response/exception frame types themselves"). The frame-type half
    /// of that rule lives on `FrameType`, not here.
    pub fn is_inherently_oneway(self) -> bool {
        matches!(self, Method::PublishOneway | Method::UpdateOneway)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "connect" => Method::Connect,
            "disconnect" => Method::Disconnect,
            "publish" => Method::Publish,
            "publishArr" => Method::PublishArr,
            "publishOneway" => Method::PublishOneway,
            "subscribe" => Method::Subscribe,
            "unSubscribe" => Method::UnSubscribe,
            "erase" => Method::Erase,
            "get" => Method::Get,
            "ping" => Method::Ping,
            "update" => Method::Update,
            "updateOneway" => Method::UpdateOneway,
            _ => {
                return Err(FrameError::InvalidUtf8 {
                    field: "method",
                })
            }
        })
    }
}
