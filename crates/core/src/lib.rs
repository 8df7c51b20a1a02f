pub mod shared {
    pub mod bounding_box;
    pub mod clip;
    pub mod config;
    pub mod constants;
    pub mod frame;
}

pub mod detection {
    pub mod domain {
        pub mod detection_model;
        pub mod face_detector;
        pub mod face_landmarks;
    }
    pub mod infrastructure;
    pub mod model_loader;
}

pub mod presence {
    pub mod domain {
        pub mod overlay;
        pub mod presence_debouncer;
    }
    pub mod face_presence_monitor;
}

pub mod capture {
    pub mod domain {
        pub mod capture_attempt;
        pub mod capture_error;
        pub mod capture_phase;
        pub mod media;
    }
    pub mod infrastructure {
        pub mod in_memory_clip_previewer;
    }
    pub mod camera_lease;
    pub mod capture_session;
}

pub mod verification {
    pub mod domain {
        pub mod loan_product;
        pub mod question;
        pub mod verification_session;
    }
    pub mod verification_flow;
}

pub mod media {
    pub mod image_sequence_stream;
}
