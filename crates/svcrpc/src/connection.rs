//! Connection states, disconnect reasons, request kinds and result codes.

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident : $what:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $value ),*
        }

        impl $name {
            pub fn from_u8(b: u8) -> Option<Self> {
                match b {
                    $( x if x == $value => Some(Self::$variant), )*
                    _ => None,
                }
            }

            pub fn as_u8(self) -> u8 {
                self as u8
            }

            /// Like `from_u8`, reporting unknown values as protocol errors.
            pub fn decode(b: u8) -> crate::error::Result<Self> {
                Self::from_u8(b).ok_or(crate::error::RpcError::UnknownValue { what: $what, value: b as u32 })
            }
        }
    };
}

wire_enum! {
    /// Connection status of a stub/proxy pair or of a whole router link.
    pub enum ServiceConnection : "service connection" {
        Unknown = 0,
        Pending = 1,
        Connected = 2,
        Disconnected = 3,
        Lost = 4,
    }
}

impl ServiceConnection {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl Default for ServiceConnection {
    fn default() -> Self {
        Self::Unknown
    }
}

wire_enum! {
    /// Why a stub/proxy pair was torn down.
    pub enum DisconnectReason : "disconnect reason" {
        Undefined = 0,
        ProviderDisconnected = 1,
        ConsumerDisconnected = 2,
        ServiceLost = 3,
        ServiceDisconnected = 4,
    }
}

impl DisconnectReason {
    /// The status reported to the remaining side.
    pub fn to_status(self) -> ServiceConnection {
        match self {
            Self::ServiceLost => ServiceConnection::Lost,
            Self::Undefined
            | Self::ProviderDisconnected
            | Self::ConsumerDisconnected
            | Self::ServiceDisconnected => ServiceConnection::Disconnected,
        }
    }
}

wire_enum! {
    /// Sub-tag of the system register messages.
    pub enum ServiceRequestType : "service request type" {
        RegisterStub = 1,
        RegisterClient = 2,
        UnregisterStub = 3,
        UnregisterClient = 4,
    }
}

impl ServiceRequestType {
    pub fn is_stub(self) -> bool {
        matches!(self, Self::RegisterStub | Self::UnregisterStub)
    }

    pub fn is_register(self) -> bool {
        matches!(self, Self::RegisterStub | Self::RegisterClient)
    }
}

wire_enum! {
    /// What a service request event asks for.
    pub enum RequestType : "request type" {
        Call = 0,
        StartNotify = 1,
        StopNotify = 2,
        RemoveAllNotify = 3,
        /// A provider-registration notice.
        ServiceConnection = 4,
        /// A consumer connected or disconnected.
        ClientConnection = 5,
    }
}

wire_enum! {
    /// Result code carried by responses.
    pub enum ResultType : "result type" {
        Undefined = 0,
        RequestOk = 1,
        RequestError = 2,
        RequestBusy = 3,
        RequestCanceled = 4,
        MessageUndelivered = 5,
        ServiceUnavailable = 6,
        ServiceRejected = 7,
        DataOk = 8,
        DataInvalid = 9,
    }
}

impl ResultType {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::RequestOk | Self::DataOk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_maps_to_status() {
        assert_eq!(DisconnectReason::ServiceLost.to_status(), ServiceConnection::Lost);
        assert_eq!(DisconnectReason::ProviderDisconnected.to_status(), ServiceConnection::Disconnected);
        assert_eq!(DisconnectReason::ConsumerDisconnected.to_status(), ServiceConnection::Disconnected);
    }

    #[test]
    fn test_unknown_discriminant_is_protocol_error() {
        assert_eq!(ResultType::from_u8(5), Some(ResultType::MessageUndelivered));
        assert!(ResultType::decode(200).is_err());
        assert!(ServiceRequestType::decode(0).is_err());
    }
}
