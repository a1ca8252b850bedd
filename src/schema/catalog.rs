//! Standard metadata catalog
//!
//! Sections mirror the instrument's configuration file:
//!
//! ```text
//! [setup]
//! channel width = 20
//! chip region = channel
//! ...
//! [imaging]
//! exposure time = 20
//! ```

use crate::value::ValueType::{Bool, Float64, Int64, Str};

use super::MetadataKey as K;
use super::Predicate::{IsoDate, IsoTime, NonNegative, Odd, OneOf, Positive};

const CHIP_REGIONS: &[&str] = &["channel", "reservoir"];

pub(super) fn standard_keys() -> Vec<K> {
    let mut keys = Vec::new();

    keys.extend([
        K::new("experiment", "date", Str)
            .required()
            .with_predicate(IsoDate)
            .describe("Date of measurement (YYYY-MM-DD)"),
        K::new("experiment", "event count", Int64)
            .with_predicate(NonNegative)
            .describe("Number of recorded events"),
        K::new("experiment", "run index", Int64)
            .required()
            .with_predicate(Positive)
            .describe("Index of measurement run"),
        K::new("experiment", "sample", Str)
            .required()
            .describe("Measured sample or user-defined reference"),
        K::new("experiment", "time", Str)
            .required()
            .with_predicate(IsoTime)
            .describe("Start time of measurement (HH:MM:SS)"),
    ]);

    keys.extend([
        K::new("fluorescence", "bit depth", Int64)
            .with_predicate(Positive)
            .describe("Trace bit depth"),
        K::new("fluorescence", "channel count", Int64)
            .with_predicate(Positive)
            .describe("Number of channels"),
        K::new("fluorescence", "laser 1 lambda", Float64)
            .with_predicate(Positive)
            .describe("Laser 1 wavelength [nm]"),
        K::new("fluorescence", "laser 1 power", Float64)
            .with_predicate(NonNegative)
            .describe("Laser 1 output power [mW]"),
        K::new("fluorescence", "laser 2 lambda", Float64)
            .with_predicate(Positive)
            .describe("Laser 2 wavelength [nm]"),
        K::new("fluorescence", "laser 2 power", Float64)
            .with_predicate(NonNegative)
            .describe("Laser 2 output power [mW]"),
        K::new("fluorescence", "laser 3 lambda", Float64)
            .with_predicate(Positive)
            .describe("Laser 3 wavelength [nm]"),
        K::new("fluorescence", "laser 3 power", Float64)
            .with_predicate(NonNegative)
            .describe("Laser 3 output power [mW]"),
        K::new("fluorescence", "sample rate", Int64)
            .with_predicate(Positive)
            .describe("Trace sample rate [Hz]"),
        K::new("fluorescence", "signal max", Float64)
            .describe("Upper voltage detection range [V]"),
        K::new("fluorescence", "signal min", Float64)
            .describe("Lower voltage detection range [V]"),
        K::new("fluorescence", "trace median", Int64)
            .with_predicate(NonNegative)
            .describe("Rolling median filter size for traces"),
    ]);

    keys.extend([
        K::new("imaging", "exposure time", Float64)
            .with_predicate(Positive)
            .describe("Sensor exposure time [µs]"),
        K::new("imaging", "flash current", Float64)
            .with_predicate(NonNegative)
            .describe("Light source current [A]"),
        K::new("imaging", "flash device", Str)
            .describe("Light source device type (e.g. green LED)"),
        K::new("imaging", "flash duration", Float64)
            .with_predicate(Positive)
            .describe("Light source flash duration [µs]"),
        K::new("imaging", "frame rate", Float64)
            .required()
            .with_predicate(Positive)
            .describe("Imaging frame rate [Hz]"),
        K::new("imaging", "pixel size", Float64)
            .required()
            .with_predicate(Positive)
            .describe("Pixel size [µm]"),
        K::new("imaging", "roi position x", Int64)
            .with_predicate(NonNegative)
            .describe("Image x coordinate on sensor [px]"),
        K::new("imaging", "roi position y", Int64)
            .with_predicate(NonNegative)
            .describe("Image y coordinate on sensor [px]"),
        K::new("imaging", "roi size x", Int64)
            .with_predicate(Positive)
            .describe("Image width [px]"),
        K::new("imaging", "roi size y", Int64)
            .with_predicate(Positive)
            .describe("Image height [px]"),
        K::new("imaging", "tap code", Str)
            .describe("Camera data transfer tap code"),
        K::new("imaging", "tap mode", Str)
            .describe("Camera data transfer tap mode"),
    ]);

    keys.extend([
        K::new("online_contour", "bin count margin", Int64)
            .with_predicate(NonNegative)
            .describe("Remove margin in x for contour detection"),
        K::new("online_contour", "bin count min", Int64)
            .with_predicate(NonNegative)
            .describe("Minimum pixel area of binary image event for contour"),
        K::new("online_contour", "bin kernel", Int64)
            .with_predicate(Odd)
            .describe("Ellipse morphing structure size of binary image (odd)"),
        K::new("online_contour", "image blur", Int64)
            .with_predicate(NonNegative)
            .describe("Sigma of Gaussian blur with 21x21 kernel size"),
        K::new("online_contour", "no absdiff", Bool)
            .describe("Avoid OpenCV 'absdiff' for bg-correction with average"),
        K::new("online_contour", "threshold", Int64)
            .describe("Threshold for binary image from bg-corrected image"),
    ]);

    keys.extend([
        K::new("online_filter", "aspect max", Float64)
            .with_predicate(NonNegative)
            .describe("Maximum aspect ratio of bounding box"),
        K::new("online_filter", "aspect min", Float64)
            .with_predicate(NonNegative)
            .describe("Minimum aspect ratio of bounding box"),
        K::new("online_filter", "size_px_x max", Int64)
            .with_predicate(NonNegative)
            .describe("Maximum bounding box size x [px]"),
        K::new("online_filter", "size_px_x min", Int64)
            .with_predicate(NonNegative)
            .describe("Minimum bounding box size x [px]"),
        K::new("online_filter", "size_py_y max", Int64)
            .with_predicate(NonNegative)
            .describe("Maximum bounding box size y [px]"),
        K::new("online_filter", "size_py_y min", Int64)
            .with_predicate(NonNegative)
            .describe("Minimum bounding box size y [px]"),
    ]);

    keys.extend([
        K::new("setup", "channel width", Float64)
            .required()
            .with_predicate(Positive)
            .describe("Width of microfluidic channel [µm]"),
        K::new("setup", "chip region", Str)
            .required()
            .lowercase()
            .with_predicate(OneOf(CHIP_REGIONS))
            .describe("Imaged chip region (channel or reservoir)"),
        K::new("setup", "flow rate", Float64)
            .required()
            .with_predicate(Positive)
            .describe("Flow rate in channel [µl/s]"),
        K::new("setup", "flow rate sample", Float64)
            .with_predicate(NonNegative)
            .describe("Sample flow rate [µl/s]"),
        K::new("setup", "flow rate sheath", Float64)
            .with_predicate(NonNegative)
            .describe("Sheath flow rate [µl/s]"),
        K::new("setup", "medium", Str)
            .describe("The medium used (e.g. CellCarrier, CellCarrierB, water)"),
        K::new("setup", "module composition", Str)
            .describe("Comma-separated list of modules used"),
        K::new("setup", "software version", Str)
            .describe("Acquisition software with version"),
        K::new("setup", "temperature", Float64)
            .describe("Chip temperature [°C]"),
    ]);

    keys
}
