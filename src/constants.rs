pub const IR_DIR: &str = "ir_images";
pub const POINT_CLOUD_DIR: &str = "point_clouds";
pub const DEFAULT_IMAGES_DIR: &str = "images_data";
pub const DEFAULT_TEMP_DIR: &str = "temp_data";
pub const DEFAULT_PROJECT_NAME: &str = "emotion_upload";
pub const DEFAULT_DATASET_NAME: &str = "cameras";
pub const CREDENTIALS_ENV_FILE: &str = "supervisely.env";
pub const LOCAL_ENV_FILE: &str = "local.env";
pub const NRRD_EXTENSION: &str = "nrrd";
pub const CHANNEL_INFIX: &str = "_channel_";
pub const MULTIVIEW_TAG_NAME: &str = "multiview";
pub const API_PREFIX: &str = "public/api/v3";
