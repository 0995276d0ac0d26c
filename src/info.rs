//! Extra information attached to a node (limits, meters, labels, ...)

use std::fmt;

use crate::error::{Result, TflowError};

/// Kind of an [`ExtraFlowNodeInfo`] record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfoKind {
    Limit,
    FlowSpecific,
    Meter,
    Label,
    Repeat,
    Trigger,
    Error,
}

impl InfoKind {
    pub fn as_str(self) -> &'static str {
        match self {
            InfoKind::Limit => "limit",
            InfoKind::FlowSpecific => "flowspecific",
            InfoKind::Meter => "meter",
            InfoKind::Label => "label",
            InfoKind::Repeat => "repeat",
            InfoKind::Trigger => "trigger",
            InfoKind::Error => "error",
        }
    }
}

impl fmt::Display for InfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One piece of extra information on a node, possibly editable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraFlowNodeInfo {
    kind: InfoKind,
    name: String,
    initial_value: Option<String>,
    edited_value: Option<String>,
    description: String,
    editable: bool,
}

impl ExtraFlowNodeInfo {
    /// Read-only record
    pub fn new(
        kind: InfoKind,
        name: impl Into<String>,
        value: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            initial_value: value,
            edited_value: None,
            description: description.into(),
            editable: false,
        }
    }

    /// Editable record (an initial value is mandatory)
    pub fn editable(
        kind: InfoKind,
        name: impl Into<String>,
        value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            initial_value: Some(value.into()),
            edited_value: None,
            description: description.into(),
            editable: true,
        }
    }

    /// Fully specified constructor, validating the editable invariant
    pub fn try_new(
        kind: InfoKind,
        name: impl Into<String>,
        initial_value: Option<String>,
        description: impl Into<String>,
        editable: bool,
    ) -> Result<Self> {
        let name = name.into();
        if editable && initial_value.is_none() {
            return Err(TflowError::MissingInitialValue { name });
        }
        Ok(Self {
            kind,
            name,
            initial_value,
            edited_value: None,
            description: description.into(),
            editable,
        })
    }

    pub fn kind(&self) -> InfoKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn initial_value(&self) -> Option<&str> {
        self.initial_value.as_deref()
    }

    /// The edited value if any, else the initial one
    pub fn value(&self) -> Option<&str> {
        self.edited_value
            .as_deref()
            .or(self.initial_value.as_deref())
    }

    pub fn set_value(&mut self, value: impl Into<String>) -> Result<()> {
        if !self.editable {
            return Err(TflowError::NotEditable {
                name: self.name.clone(),
            });
        }
        self.edited_value = Some(value.into());
        Ok(())
    }

    /// Edited and different from the initial value
    pub fn touched(&self) -> bool {
        match &self.edited_value {
            Some(edited) => Some(edited) != self.initial_value.as_ref(),
            None => false,
        }
    }
}

impl fmt::Display for ExtraFlowNodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} = {}",
            self.kind,
            self.name,
            self.value().unwrap_or("-")
        )?;
        if !self.description.is_empty() {
            write!(f, " ({})", self.description)?;
        }
        Ok(())
    }
}
