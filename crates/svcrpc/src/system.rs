//! System messages exchanged with the router on the reserved message ids.

use svcpack::Writer;

use crate::address::ProxyAddress;
use crate::address::StubAddress;
use crate::connection::DisconnectReason;
use crate::connection::ResultType;
use crate::connection::ServiceConnection;
use crate::connection::ServiceRequestType;
use crate::error::Result;
use crate::error::RpcError;
use crate::ids::Cookie;
use crate::ids::MessageId;
use crate::ids::SEQUENCE_NUMBER_NOTIFY;
use crate::ids::SYSTEM_SERVICE_DISCONNECT;
use crate::ids::SYSTEM_SERVICE_NOTIFY_CONNECTION;
use crate::ids::SYSTEM_SERVICE_NOTIFY_REGISTER;
use crate::ids::SYSTEM_SERVICE_REQUEST_REGISTER;
use crate::message::MessageWriter;
use crate::message::RemoteMessage;

/// The endpoint a register message is about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Stub(StubAddress),
    Proxy(ProxyAddress),
}

impl Endpoint {
    pub fn cookie(&self) -> Cookie {
        match self {
            Self::Stub(s) => s.channel().cookie,
            Self::Proxy(p) => p.channel().cookie,
        }
    }

    pub fn set_cookie(&mut self, cookie: Cookie) {
        match self {
            Self::Stub(s) => s.set_cookie(cookie),
            Self::Proxy(p) => p.set_cookie(cookie),
        }
    }
}

/// One register/unregister of a stub or proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub request: ServiceRequestType,
    /// Meaningful for unregistering only.
    pub reason: DisconnectReason,
    pub endpoint: Endpoint,
}

impl Registration {
    pub fn register_stub(stub: StubAddress) -> Self {
        Self { request: ServiceRequestType::RegisterStub, reason: DisconnectReason::Undefined, endpoint: Endpoint::Stub(stub) }
    }

    pub fn register_proxy(proxy: ProxyAddress) -> Self {
        Self { request: ServiceRequestType::RegisterClient, reason: DisconnectReason::Undefined, endpoint: Endpoint::Proxy(proxy) }
    }

    pub fn unregister_stub(stub: StubAddress, reason: DisconnectReason) -> Self {
        Self { request: ServiceRequestType::UnregisterStub, reason, endpoint: Endpoint::Stub(stub) }
    }

    pub fn unregister_proxy(proxy: ProxyAddress, reason: DisconnectReason) -> Self {
        Self { request: ServiceRequestType::UnregisterClient, reason, endpoint: Endpoint::Proxy(proxy) }
    }

    fn write(&self, w: &mut Writer) -> Result<()> {
        w.u8(self.request.as_u8());
        w.u8(self.reason.as_u8());
        match &self.endpoint {
            Endpoint::Stub(s) => w.put(s)?,
            Endpoint::Proxy(p) => w.put(p)?,
        }
        Ok(())
    }

    fn read(msg: &RemoteMessage) -> Result<Self> {
        let mut r = msg.body_reader();
        let request = ServiceRequestType::decode(r.u8()?)?;
        let reason = DisconnectReason::decode(r.u8()?)?;
        let endpoint = if request.is_stub() { Endpoint::Stub(r.get()?) } else { Endpoint::Proxy(r.get()?) };
        Ok(Self { request, reason, endpoint })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMessage {
    /// Process to router: register or unregister one of my endpoints.
    RequestRegister(Registration),
    /// Router to process: a remote endpoint was registered or unregistered.
    NotifyRegister(Registration),
    /// Router to process: your cookie, and whether the link is up.
    NotifyConnection { cookie: Cookie, status: ServiceConnection },
    /// Purge everything owned by a cookie.
    Disconnect { cookie: Cookie },
}

impl SystemMessage {
    pub fn message_id(&self) -> MessageId {
        match self {
            Self::RequestRegister(_) => SYSTEM_SERVICE_REQUEST_REGISTER,
            Self::NotifyRegister(_) => SYSTEM_SERVICE_NOTIFY_REGISTER,
            Self::NotifyConnection { .. } => SYSTEM_SERVICE_NOTIFY_CONNECTION,
            Self::Disconnect { .. } => SYSTEM_SERVICE_DISCONNECT,
        }
    }

    pub fn encode(&self, source: Cookie, target: Cookie) -> Result<Vec<u8>> {
        let mut mw = MessageWriter::new(source, target, self.message_id(), ResultType::Undefined, SEQUENCE_NUMBER_NOTIFY);
        let w = mw.body();
        match self {
            Self::RequestRegister(reg) | Self::NotifyRegister(reg) => reg.write(w)?,
            Self::NotifyConnection { cookie, status } => {
                w.u64(*cookie);
                w.u8(status.as_u8());
            }
            Self::Disconnect { cookie } => w.u64(*cookie),
        }
        Ok(mw.finalize())
    }

    pub fn decode(msg: &RemoteMessage) -> Result<Self> {
        match msg.message_id {
            SYSTEM_SERVICE_REQUEST_REGISTER => Ok(Self::RequestRegister(Registration::read(msg)?)),
            SYSTEM_SERVICE_NOTIFY_REGISTER => Ok(Self::NotifyRegister(Registration::read(msg)?)),
            SYSTEM_SERVICE_NOTIFY_CONNECTION => {
                let mut r = msg.body_reader();
                let cookie = r.u64()?;
                let status = ServiceConnection::decode(r.u8()?)?;
                Ok(Self::NotifyConnection { cookie, status })
            }
            SYSTEM_SERVICE_DISCONNECT => {
                let mut r = msg.body_reader();
                Ok(Self::Disconnect { cookie: r.u64()? })
            }
            other => Err(RpcError::ProtocolViolation(format!("Not a system message id: {:#x}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Channel;
    use crate::address::ServiceItem;
    use crate::address::ServiceType;
    use crate::address::Version;
    use crate::ids::COOKIE_ROUTER;

    fn stub() -> StubAddress {
        let item = ServiceItem::new("Calc", Version::new(1, 0, 0), ServiceType::Public);
        StubAddress::new(item, "MainCalc", "WorkerThread").with_channel(Channel::new(300, 0, 0))
    }

    #[test]
    fn test_register_stub_roundtrip() {
        let sys = SystemMessage::RequestRegister(Registration::register_stub(stub()));
        let bytes = sys.encode(300, COOKIE_ROUTER).unwrap();
        let msg = RemoteMessage::decode(&bytes).unwrap();
        assert_eq!(msg.message_id, SYSTEM_SERVICE_REQUEST_REGISTER);
        assert_eq!(msg.target, COOKIE_ROUTER);

        let back = SystemMessage::decode(&msg).unwrap();
        let SystemMessage::RequestRegister(reg) = back else { panic!("wrong variant") };
        assert_eq!(reg.endpoint, Endpoint::Stub(stub()));
        assert_eq!(reg.endpoint.cookie(), 300);
    }

    #[test]
    fn test_unregister_carries_reason() {
        let sys = SystemMessage::NotifyRegister(Registration::unregister_stub(stub(), DisconnectReason::ServiceLost));
        let msg = RemoteMessage::decode(&sys.encode(COOKIE_ROUTER, 301).unwrap()).unwrap();
        let SystemMessage::NotifyRegister(reg) = SystemMessage::decode(&msg).unwrap() else { panic!("wrong variant") };
        assert_eq!(reg.request, ServiceRequestType::UnregisterStub);
        assert_eq!(reg.reason, DisconnectReason::ServiceLost);
    }

    #[test]
    fn test_connection_notice() {
        let sys = SystemMessage::NotifyConnection { cookie: 256, status: ServiceConnection::Connected };
        let msg = RemoteMessage::decode(&sys.encode(COOKIE_ROUTER, 256).unwrap()).unwrap();
        assert_eq!(SystemMessage::decode(&msg).unwrap(), sys);
    }

    #[test]
    fn test_service_message_is_not_system() {
        let msg = RemoteMessage::new(256, 257, 0x3000, ResultType::Undefined, 1, Vec::new());
        assert!(matches!(SystemMessage::decode(&msg), Err(RpcError::ProtocolViolation(_))));
    }
}
