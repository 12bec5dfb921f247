//! Debug-utils messenger callback.
//!
//! Driver and validation-layer messages are forwarded to `tracing`, with the
//! severity mapped onto the matching log level.

use ash::vk;
use std::ffi::{c_void, CStr};
use std::fmt;

/// Validation message ids that are known to be benign and are dropped in debug builds.
pub const IGNORED_MESSAGE_IDS: [i32; 2] = [648_835_635, 767_975_156];

/// Whether a message with this id is suppressed.
pub fn is_ignored_message(message_id_number: i32) -> bool {
    cfg!(debug_assertions) && IGNORED_MESSAGE_IDS.contains(&message_id_number)
}

/// Create info for a messenger that reports warnings and errors of every type.
pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
        )
        .pfn_user_callback(Some(debug_utils_messenger_callback))
}

/// An object referenced by a debug message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugObject {
    pub object_type: vk::ObjectType,
    pub handle: u64,
    pub name: Option<String>,
}

/// Owned copy of the callback payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugMessage {
    pub id_name: String,
    pub id_number: i32,
    pub message: String,
    pub queue_labels: Vec<String>,
    pub command_buffer_labels: Vec<String>,
    pub objects: Vec<DebugObject>,
}

unsafe fn lossy(ptr: *const std::ffi::c_char) -> Option<String> {
    (!ptr.is_null()).then(|| CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

unsafe fn raw_slice<'a, T>(ptr: *const T, count: u32) -> &'a [T] {
    if ptr.is_null() || count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, count as usize)
    }
}

impl DebugMessage {
    /// Copy the driver-owned callback data.
    ///
    /// # Safety
    /// `data` must point to callback data valid for the duration of the call.
    pub unsafe fn from_raw(data: &vk::DebugUtilsMessengerCallbackDataEXT<'_>) -> Self {
        let labels = |labels: &[vk::DebugUtilsLabelEXT<'_>]| {
            labels
                .iter()
                .map(|label| lossy(label.p_label_name).unwrap_or_default())
                .collect()
        };

        Self {
            id_name: lossy(data.p_message_id_name).unwrap_or_default(),
            id_number: data.message_id_number,
            message: lossy(data.p_message).unwrap_or_default(),
            queue_labels: labels(raw_slice(data.p_queue_labels, data.queue_label_count)),
            command_buffer_labels: labels(raw_slice(
                data.p_cmd_buf_labels,
                data.cmd_buf_label_count,
            )),
            objects: raw_slice(data.p_objects, data.object_count)
                .iter()
                .map(|object| DebugObject {
                    object_type: object.object_type,
                    handle: object.object_handle,
                    name: lossy(object.p_object_name),
                })
                .collect(),
        }
    }
}

impl fmt::Display for DebugMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} ({:#x})] {}",
            self.id_name, self.id_number, self.message
        )?;
        if !self.queue_labels.is_empty() {
            write!(f, " | queue labels: {}", self.queue_labels.join(", "))?;
        }
        if !self.command_buffer_labels.is_empty() {
            write!(
                f,
                " | command buffer labels: {}",
                self.command_buffer_labels.join(", ")
            )?;
        }
        for (index, object) in self.objects.iter().enumerate() {
            write!(
                f,
                " | object {index}: {:?} {:#x}",
                object.object_type, object.handle
            )?;
            if let Some(name) = &object.name {
                write!(f, " \"{name}\"")?;
            }
        }
        Ok(())
    }
}

/// Messenger callback that forwards messages to `tracing`.
///
/// # Safety
/// Called by the driver with valid callback data.
pub unsafe extern "system" fn debug_utils_messenger_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_types: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let Some(data) = callback_data.as_ref() else {
        return vk::FALSE;
    };
    if is_ignored_message(data.message_id_number) {
        return vk::FALSE;
    }

    let message = DebugMessage::from_raw(data);
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(types = ?message_types, "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(types = ?message_types, "{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::info!(types = ?message_types, "{message}");
    } else {
        tracing::debug!(types = ?message_types, "{message}");
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn benign_ids_filtered_in_debug_builds() {
        assert_eq!(is_ignored_message(648_835_635), cfg!(debug_assertions));
        assert_eq!(is_ignored_message(767_975_156), cfg!(debug_assertions));
        assert!(!is_ignored_message(0));
    }

    #[test]
    fn message_formatting_includes_labels_and_objects() {
        let message = DebugMessage {
            id_name: "VUID-test".to_string(),
            id_number: 0x10,
            message: "something happened".to_string(),
            queue_labels: vec!["graphics".to_string()],
            command_buffer_labels: vec![],
            objects: vec![DebugObject {
                object_type: vk::ObjectType::BUFFER,
                handle: 0xab,
                name: Some("vertices".to_string()),
            }],
        };

        let text = message.to_string();
        assert!(text.starts_with("[VUID-test (0x10)] something happened"));
        assert!(text.contains("queue labels: graphics"));
        assert!(!text.contains("command buffer labels"));
        assert!(text.contains("object 0: BUFFER 0xab \"vertices\""));
    }

    #[test]
    fn from_raw_copies_strings() {
        let id = c"VUID-copy";
        let text = c"copied";
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default()
            .message_id_name(id)
            .message_id_number(7)
            .message(text);

        let message = unsafe { DebugMessage::from_raw(&data) };
        assert_eq!(message.id_name, "VUID-copy");
        assert_eq!(message.id_number, 7);
        assert_eq!(message.message, "copied");
        assert!(message.objects.is_empty());
    }

    #[test]
    fn callback_never_aborts() {
        let data = vk::DebugUtilsMessengerCallbackDataEXT::default().message(c"hello");
        let result = unsafe {
            debug_utils_messenger_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                &data,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(result, vk::FALSE);
    }
}
