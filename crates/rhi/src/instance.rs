//! Vulkan instance and validation-layer messenger.

use std::ffi::{CStr, CString, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, trace, warn};

use crate::error::{RhiError, RhiResult};

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Owns the Vulkan loader entry, the instance and (when validation is on)
/// the debug messenger.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl Instance {
    /// Creates a Vulkan 1.3 instance.
    ///
    /// # Arguments
    ///
    /// * `app_name` - Application name reported to the driver
    /// * `enable_validation` - Request the Khronos validation layer; silently
    ///   skipped (with a warning) if it is not installed
    /// * `surface_extensions` - Window-system extensions, usually from
    ///   `ash_window::enumerate_required_extensions`
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan library cannot be loaded or instance
    /// creation fails.
    pub fn new(
        app_name: &str,
        enable_validation: bool,
        surface_extensions: &[*const c_char],
    ) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation_available =
            enable_validation && Self::is_validation_layer_available(&entry)?;
        if enable_validation && !validation_available {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_name = CString::new(app_name).unwrap_or_else(|_| c"blackhole".to_owned());
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"blackhole")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = surface_extensions.to_vec();
        if validation_available {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation_available {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!("Vulkan instance created (API version 1.3)");

        let (debug_utils, debug_messenger) = if validation_available {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => messenger,
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            };
            info!("Validation layers enabled");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        Ok(available_layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME)))
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        debug!("Debug messenger created");
        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

fn message_type_name(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };
    let kind = message_type_name(message_type);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            error!(target: "vulkan", kind, "{}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            warn!(target: "vulkan", kind, "{}", message);
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => {
            debug!(target: "vulkan", kind, "{}", message);
        }
        _ => {
            trace!(target: "vulkan", kind, "{}", message);
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_name() {
        assert_eq!(
            message_type_name(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION),
            "validation"
        );
        assert_eq!(
            message_type_name(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
            ),
            "performance"
        );
        assert_eq!(
            message_type_name(vk::DebugUtilsMessageTypeFlagsEXT::GENERAL),
            "general"
        );
    }

    #[test]
    fn test_headless_instance_creation() {
        // Needs a Vulkan loader and driver; skipped otherwise.
        match Instance::new("blackhole-test", false, &[]) {
            Ok(instance) => assert!(!instance.has_validation()),
            Err(e) => eprintln!("Skipping test: Vulkan not available ({e})"),
        }
    }
}
