//! # Interface Shapes
//!
//! A service interface is described by a small table instead of generated
//! event types: its requests (each optionally paired with a response), its
//! responses and its attributes. The position of an entry in its table is the
//! offset into the matching message-id sub-range.
//!
//! ```text
//! requests[i]   -> REQUEST_ID_FIRST   + i
//! responses[i]  -> RESPONSE_ID_FIRST  + i
//! attributes[i] -> ATTRIBUTE_ID_FIRST + i
//! ```

use crate::address::ServiceItem;
use crate::address::ServiceType;
use crate::address::Version;
use crate::ids::attribute_id;
use crate::ids::request_id;
use crate::ids::response_id;
use crate::ids::MessageClass;
use crate::ids::MessageId;
use crate::ids::ATTRIBUTE_ID_FIRST;
use crate::ids::REQUEST_ID_FIRST;
use crate::ids::RESPONSE_ID_FIRST;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RequestEntry {
    name: String,
    response: Option<u32>,
}

/// Name-to-id table of one service interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceShape {
    name: String,
    version: Version,
    requests: Vec<RequestEntry>,
    responses: Vec<String>,
    attributes: Vec<String>,
}

impl InterfaceShape {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            requests: Vec::new(),
            responses: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Adds a request, optionally paired with a response. A response name not
    /// declared yet is appended to the response table.
    pub fn request(mut self, name: impl Into<String>, response: Option<&str>) -> Self {
        let response = response.map(|r| self.response_index_or_insert(r));
        self.requests.push(RequestEntry { name: name.into(), response });
        self
    }

    pub fn response(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.response_index_or_insert(&name);
        self
    }

    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }

    fn response_index_or_insert(&mut self, name: &str) -> u32 {
        match self.responses.iter().position(|r| r == name) {
            Some(i) => i as u32,
            None => {
                self.responses.push(name.to_string());
                (self.responses.len() - 1) as u32
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// The service item this interface is offered as.
    pub fn item(&self, service_type: ServiceType) -> ServiceItem {
        ServiceItem::new(self.name.clone(), self.version, service_type)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn request_id(&self, name: &str) -> Option<MessageId> {
        self.requests.iter().position(|r| r.name == name).map(|i| request_id(i as u32))
    }

    pub fn response_id(&self, name: &str) -> Option<MessageId> {
        self.responses.iter().position(|r| r == name).map(|i| response_id(i as u32))
    }

    pub fn attribute_id(&self, name: &str) -> Option<MessageId> {
        self.attributes.iter().position(|a| a == name).map(|i| attribute_id(i as u32))
    }

    /// True if the id names one of this interface's requests, responses or attributes.
    pub fn contains(&self, id: MessageId) -> bool {
        match MessageClass::of(id) {
            MessageClass::Request => ((id - REQUEST_ID_FIRST) as usize) < self.requests.len(),
            MessageClass::Response => ((id - RESPONSE_ID_FIRST) as usize) < self.responses.len(),
            MessageClass::Attribute => ((id - ATTRIBUTE_ID_FIRST) as usize) < self.attributes.len(),
            MessageClass::Empty | MessageClass::ServiceInternal | MessageClass::Invalid => false,
        }
    }

    /// The response paired with a request, if the request has one.
    pub fn response_for_request(&self, request: MessageId) -> Option<MessageId> {
        if MessageClass::of(request) != MessageClass::Request {
            return None;
        }
        let entry = self.requests.get((request - REQUEST_ID_FIRST) as usize)?;
        entry.response.map(response_id)
    }

    /// Id carried by the undelivered reply to `id`.
    ///
    /// Requests map to their paired response; everything else (notify
    /// requests on attributes or responses, requests without a response)
    /// keeps its own id.
    pub fn failure_response_id(&self, id: MessageId) -> MessageId {
        self.response_for_request(id).unwrap_or(id)
    }

    pub fn message_name(&self, id: MessageId) -> Option<&str> {
        match MessageClass::of(id) {
            MessageClass::Request => self
                .requests
                .get((id - REQUEST_ID_FIRST) as usize)
                .map(|r| r.name.as_str()),
            MessageClass::Response => self
                .responses
                .get((id - RESPONSE_ID_FIRST) as usize)
                .map(String::as_str),
            MessageClass::Attribute => self
                .attributes
                .get((id - ATTRIBUTE_ID_FIRST) as usize)
                .map(String::as_str),
            MessageClass::Empty | MessageClass::ServiceInternal | MessageClass::Invalid => None,
        }
    }
}
