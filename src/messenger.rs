//! Debug utils messenger forwarding validation output to `tracing`.

use std::{
    ffi::{c_void, CStr},
    sync::Mutex,
};

use anyhow::Context;
use ash::{extensions::ext::DebugUtils, vk};

use crate::error::Error;

/// Severity of a validation message, ordered least to most severe.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Default)]
pub enum Severity {
    Verbose,
    Info,
    #[default]
    Warning,
    Error,
}

impl Severity {
    pub fn from_flags(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
            Severity::Error
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
            Severity::Warning
        } else if flags.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
            Severity::Info
        } else {
            Severity::Verbose
        }
    }

    /// All severity flags at or above `self`.
    pub fn and_above(self) -> vk::DebugUtilsMessageSeverityFlagsEXT {
        [
            (Severity::Verbose, vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE),
            (Severity::Info, vk::DebugUtilsMessageSeverityFlagsEXT::INFO),
            (Severity::Warning, vk::DebugUtilsMessageSeverityFlagsEXT::WARNING),
            (Severity::Error, vk::DebugUtilsMessageSeverityFlagsEXT::ERROR),
        ]
        .into_iter()
        .filter(|(severity, _)| *severity >= self)
        .fold(vk::DebugUtilsMessageSeverityFlagsEXT::empty(), |flags, (_, flag)| flags | flag)
    }
}

pub type FormatFn = fn(Severity, vk::DebugUtilsMessageTypeFlagsEXT, &str) -> String;

pub fn default_format(
    severity: Severity,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    message: &str,
) -> String {
    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "GENERAL",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "VALIDATION",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "PERFORMANCE",
        _ => "UNKNOWN",
    };
    format!("{severity:?} [{type_str}] {message}")
}

#[derive(Debug, Clone)]
pub struct MessengerCreateInfo {
    /// Messages below this severity are not requested from the driver.
    pub min_severity: Severity,
    pub message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    /// Messages at or above this severity are recorded and reported by
    /// [`Messenger::check`].
    pub error_severity: Option<Severity>,
    pub format: FormatFn,
}

impl Default for MessengerCreateInfo {
    fn default() -> Self {
        Self {
            min_severity: Severity::Warning,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            error_severity: None,
            format: default_format,
        }
    }
}

struct MessengerState {
    error_severity: Option<Severity>,
    format: FormatFn,
    errors: Mutex<Vec<String>>,
}

impl MessengerState {
    fn dispatch(
        &self,
        severity: Severity,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT,
        message: &str,
    ) {
        let formatted = (self.format)(severity, message_type, message);
        match severity {
            Severity::Verbose => tracing::trace!(target: "vulkan_raii::messenger", "{formatted}"),
            Severity::Info => tracing::info!(target: "vulkan_raii::messenger", "{formatted}"),
            Severity::Warning => tracing::warn!(target: "vulkan_raii::messenger", "{formatted}"),
            Severity::Error => tracing::error!(target: "vulkan_raii::messenger", "{formatted}"),
        }
        if self.error_severity.is_some_and(|threshold| severity >= threshold) {
            if let Ok(mut errors) = self.errors.lock() {
                errors.push(formatted);
            }
        }
    }

    fn take_errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .map(|mut errors| std::mem::take(&mut *errors))
            .unwrap_or_default()
    }
}

unsafe extern "system" fn callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    p_user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || p_user_data.is_null() {
        return vk::FALSE;
    }
    let data = &*p_callback_data;
    let message = if data.p_message.is_null() {
        "<no message>".into()
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy()
    };
    let state = &*(p_user_data as *const MessengerState);
    state.dispatch(Severity::from_flags(message_severity), message_type, &message);
    vk::FALSE
}

pub struct Messenger {
    pub handle: vk::DebugUtilsMessengerEXT,
    pub functions: DebugUtils,
    // Boxed so the pointer handed to the driver stays put.
    state: Box<MessengerState>,
}

impl Messenger {
    pub(crate) fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        create_info: &MessengerCreateInfo,
    ) -> anyhow::Result<Self> {
        let functions = DebugUtils::new(entry, instance);
        let state = Box::new(MessengerState {
            error_severity: create_info.error_severity,
            format: create_info.format,
            errors: Mutex::new(Vec::new()),
        });
        let info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(create_info.min_severity.and_above())
            .message_type(create_info.message_type)
            .pfn_user_callback(Some(callback))
            .user_data(&*state as *const MessengerState as *mut c_void);
        let handle = unsafe { functions.create_debug_utils_messenger(&info, None) }
            .context("vkCreateDebugUtilsMessengerEXT")?;
        tracing::debug!("Created debug messenger {:?}", handle);
        Ok(Self {
            handle,
            functions,
            state,
        })
    }

    /// Fails with [`Error::Validation`] if messages at or above the configured
    /// error severity arrived since the last call.
    pub fn check(&self) -> anyhow::Result<()> {
        let errors = self.state.take_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors).into())
        }
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        tracing::debug!("Dropping debug messenger {:?}", self.handle);
        unsafe {
            self.functions
                .destroy_debug_utils_messenger(self.handle, None)
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(error_severity: Option<Severity>) -> MessengerState {
        MessengerState {
            error_severity,
            format: default_format,
            errors: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn severity_orders_least_to_most_severe() {
        assert!(Severity::Verbose < Severity::Info);
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
    }

    #[test]
    fn and_above_includes_threshold() {
        assert_eq!(
            Severity::Warning.and_above(),
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        );
        assert_eq!(
            Severity::Error.and_above(),
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
        );
    }

    #[test]
    fn records_messages_at_or_above_error_severity() {
        let state = state(Some(Severity::Warning));
        let validation = vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION;
        state.dispatch(Severity::Info, validation, "ignored");
        state.dispatch(Severity::Warning, validation, "kept");
        state.dispatch(Severity::Error, validation, "also kept");

        assert_eq!(
            state.take_errors(),
            ["Warning [VALIDATION] kept", "Error [VALIDATION] also kept"]
        );
        assert!(state.take_errors().is_empty());
    }

    #[test]
    fn records_nothing_without_error_severity() {
        let state = state(None);
        state.dispatch(
            Severity::Error,
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
            "logged only",
        );
        assert!(state.take_errors().is_empty());
    }

    #[test]
    fn severity_from_flags_picks_highest_bit() {
        assert_eq!(
            Severity::from_flags(vk::DebugUtilsMessageSeverityFlagsEXT::INFO),
            Severity::Info
        );
        assert_eq!(
            Severity::from_flags(
                vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
            ),
            Severity::Error
        );
    }
}
