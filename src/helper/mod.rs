pub mod overlay_helper;
