//! Built-in WGSL sources.
//!
//! Each file holds one stage. Vertex stages define `vs`, fragment stages `fs`.

pub const QUAD_VS: &str = include_str!("shaders/quad_vs.wgsl");
pub const DOWNSAMPLE_FS: &str = include_str!("shaders/downsample_fs.wgsl");
pub const BLUR_X_FS: &str = include_str!("shaders/blur_x_fs.wgsl");
pub const BLUR_Y_FS: &str = include_str!("shaders/blur_y_fs.wgsl");
pub const DOF_COMPOSITE_FS: &str = include_str!("shaders/dof_composite_fs.wgsl");

pub const SCENE_VS: &str = include_str!("shaders/scene_vs.wgsl");
pub const SCENE_FS: &str = include_str!("shaders/scene_fs.wgsl");
pub const VECTOR_FIELD_VS: &str = include_str!("shaders/vector_field_vs.wgsl");
pub const STREAMLINE_VS: &str = include_str!("shaders/streamline_vs.wgsl");
pub const STREAMLINE_FS: &str = include_str!("shaders/streamline_fs.wgsl");

/// Every built-in (label, vertex, fragment) pairing.
pub const PROGRAMS: &[(&str, &str, &str)] = &[
    ("downsample", QUAD_VS, DOWNSAMPLE_FS),
    ("blur_x", QUAD_VS, BLUR_X_FS),
    ("blur_y", QUAD_VS, BLUR_Y_FS),
    ("dof_composite", QUAD_VS, DOF_COMPOSITE_FS),
    ("scene", SCENE_VS, SCENE_FS),
    ("vector_field", VECTOR_FIELD_VS, SCENE_FS),
    ("streamline", STREAMLINE_VS, STREAMLINE_FS),
];
