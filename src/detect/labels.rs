/// COCO class names in model output order.
pub const COCO_CLASSES: &[&str] = &[
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// COCO id of `car`.
pub const CAR: u32 = 2;

/// Road vehicle classes: car, motorcycle, bus, truck.
pub const VEHICLE_CLASSES: &[u32] = &[2, 3, 5, 7];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vehicle_ids_resolve_to_vehicle_names() {
        let names: Vec<&str> = VEHICLE_CLASSES
            .iter()
            .map(|id| COCO_CLASSES[*id as usize])
            .collect();
        assert_eq!(names, vec!["car", "motorcycle", "bus", "truck"]);
        assert_eq!(COCO_CLASSES.len(), 80);
    }
}
