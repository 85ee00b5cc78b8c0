// Diagnostics messenger
//
// Forwards severity- and category-filtered driver messages to a pluggable
// sink. Purely observational: the callback never aborts and always tells the
// driver to continue. One sink per instance, handed over explicitly and
// carried through the messenger's user-data pointer.

use ash::vk;
use std::ffi::{c_void, CStr};

use super::instance::AllocationHooks;
use crate::error::RenderError;

/// Severities the messenger subscribes to. Every level the sink can
/// distinguish is reported.
const REPORTED_SEVERITIES: vk::DebugUtilsMessageSeverityFlagsEXT =
    vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE.as_raw()
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO.as_raw()
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING.as_raw()
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR.as_raw(),
    );

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<vk::DebugUtilsMessageSeverityFlagsEXT> for Severity {
    fn from(flags: vk::DebugUtilsMessageSeverityFlagsEXT) -> Self {
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    General,
    Validation,
    Performance,
}

impl From<vk::DebugUtilsMessageTypeFlagsEXT> for Category {
    fn from(flags: vk::DebugUtilsMessageTypeFlagsEXT) -> Self {
        if flags.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
            Category::Validation
        } else if flags.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
            Category::Performance
        } else {
            Category::General
        }
    }
}

/// Receives every message the driver reports through the messenger.
pub type DiagnosticSink = Box<dyn Fn(Severity, Category, &str) + Send + Sync>;

/// Default sink: route through the `log` crate (env_logger writes to stderr).
pub fn log_sink() -> DiagnosticSink {
    Box::new(|severity, category, message| {
        let tag = match category {
            Category::General => "general",
            Category::Validation => "validation",
            Category::Performance => "performance",
        };
        match severity {
            Severity::Error => log::error!("[vulkan/{}] {}", tag, message),
            Severity::Warning => log::warn!("[vulkan/{}] {}", tag, message),
            Severity::Info => log::info!("[vulkan/{}] {}", tag, message),
            Severity::Verbose => log::debug!("[vulkan/{}] {}", tag, message),
        }
    })
}

pub struct DebugMessenger {
    loader: ash::extensions::ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
    hooks: AllocationHooks,
    // Boxed twice so the user-data pointer stays valid and thin for the
    // lifetime of the messenger.
    _sink: Box<DiagnosticSink>,
}

impl DebugMessenger {
    pub fn new(
        entry: &ash::Entry,
        instance: &ash::Instance,
        sink: DiagnosticSink,
        hooks: AllocationHooks,
    ) -> Result<Self, RenderError> {
        let loader = ash::extensions::ext::DebugUtils::new(entry, instance);
        let sink = Box::new(sink);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(REPORTED_SEVERITIES)
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(forward_to_sink))
            .user_data(&*sink as *const DiagnosticSink as *mut c_void);

        let messenger =
            unsafe { loader.create_debug_utils_messenger(&create_info, hooks.as_vk())? };

        Ok(Self {
            loader,
            messenger,
            hooks,
            _sink: sink,
        })
    }
}

impl Drop for DebugMessenger {
    fn drop(&mut self) {
        unsafe {
            self.loader
                .destroy_debug_utils_messenger(self.messenger, self.hooks.as_vk());
        }
    }
}

unsafe extern "system" fn forward_to_sink(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || user_data.is_null() {
        return vk::FALSE;
    }

    let sink = &*(user_data as *const DiagnosticSink);
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();
    sink(severity.into(), message_type.into(), &message);

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_picks_highest_bit() {
        let flags = vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
        assert_eq!(Severity::from(flags), Severity::Error);

        let flags = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
        assert_eq!(Severity::from(flags), Severity::Verbose);
    }

    #[test]
    fn category_prefers_validation() {
        let flags = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION;
        assert_eq!(Category::from(flags), Category::Validation);
    }

    #[test]
    fn every_sink_severity_is_subscribed() {
        for flag in [
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        ] {
            assert!(REPORTED_SEVERITIES.contains(flag));
        }
    }
}
