//! Standard feature catalog
//!
//! Scalar columns plus the image, contour and fluorescence trace streams
//! recorded by the instrument.

use crate::value::ValueType::{Float64, Int64, UInt8};

use super::Feature;

const SCALARS: &[(&str, &str)] = &[
    ("area_cvx", "Convex area [px]"),
    ("area_msd", "Measured area [px]"),
    ("area_ratio", "Convex to measured area ratio"),
    ("area_um", "Area [µm²]"),
    ("aspect", "Aspect ratio of bounding box"),
    ("bright_avg", "Brightness average within contour [a.u.]"),
    ("bright_sd", "Brightness SD within contour [a.u.]"),
    ("circ", "Circularity"),
    ("deform", "Deformation"),
    ("emodulus", "Young's Modulus [kPa]"),
    ("fl1_area", "FL-1 area of peak [a.u.]"),
    ("fl1_dist", "FL-1 distance between two first peaks [µs]"),
    ("fl1_max", "FL-1 maximum [a.u.]"),
    ("fl1_pos", "FL-1 position of peak [µs]"),
    ("fl1_width", "FL-1 width [µs]"),
    ("fl2_area", "FL-2 area of peak [a.u.]"),
    ("fl2_dist", "FL-2 distance between two first peaks [µs]"),
    ("fl2_max", "FL-2 maximum [a.u.]"),
    ("fl2_pos", "FL-2 position of peak [µs]"),
    ("fl2_width", "FL-2 width [µs]"),
    ("fl3_area", "FL-3 area of peak [a.u.]"),
    ("fl3_dist", "FL-3 distance between two first peaks [µs]"),
    ("fl3_max", "FL-3 maximum [a.u.]"),
    ("fl3_pos", "FL-3 position of peak [µs]"),
    ("fl3_width", "FL-3 width [µs]"),
    ("inert_ratio_cvx", "Inertia ratio of convex contour sqrt(m20/m02)"),
    ("inert_ratio_raw", "Inertia ratio of raw contour sqrt(m20/m02)"),
    ("pc1", "Principal component 1"),
    ("pc2", "Principal component 2"),
    ("pos_x", "Position along channel axis [µm]"),
    ("pos_y", "Position lateral in channel [µm]"),
    ("size_x", "Bounding box size x [µm]"),
    ("size_y", "Bounding box size y [µm]"),
    ("time", "Event time [s]"),
    ("volume", "Volume [µm³]"),
];

// Counts and indices
const INTEGER_SCALARS: &[(&str, &str)] = &[
    ("fl1_npeaks", "FL-1 number of peaks"),
    ("fl2_npeaks", "FL-2 number of peaks"),
    ("fl3_npeaks", "FL-3 number of peaks"),
    ("frame", "Video frame number"),
    ("index", "Event index"),
    ("ncells", "Number of cells in image"),
];

const TRACES: &[(&str, &str)] = &[
    ("fl1_median", "FL-1 median-filtered trace"),
    ("fl1_raw", "FL-1 raw trace"),
    ("fl2_median", "FL-2 median-filtered trace"),
    ("fl2_raw", "FL-2 raw trace"),
    ("fl3_median", "FL-3 median-filtered trace"),
    ("fl3_raw", "FL-3 raw trace"),
];

pub(super) fn standard_features() -> Vec<Feature> {
    let mut features = Vec::with_capacity(SCALARS.len() + INTEGER_SCALARS.len() + TRACES.len() + 2);
    features.extend(SCALARS.iter().map(|(n, d)| Feature::scalar(*n, Float64, d)));
    features.extend(INTEGER_SCALARS.iter().map(|(n, d)| Feature::scalar(*n, Int64, d)));
    features.extend(TRACES.iter().map(|(n, d)| Feature::trace(*n, Int64, d)));
    features.push(Feature::image("image", UInt8, "Grayscale event image"));
    features.push(Feature::contour("contour", Int64, "Event contour points (x, y) [px]"));
    features
}
