use super::{
    tree::{self, Element},
    ANNOTATION, ANNOPOINTS, ANNORECT, CONFIDENCE, FRAME_NUMBER, ID, IMAGE, IS_3D_ATTRIBUTE, NAME,
    POINT, ROOT, USER_ID_ATTRIBUTE, X, Y, Z,
};
use crate::{
    error::Error,
    joint::Joint,
    skeleton::{JointPosition, SkeletonFrame},
    store::{AnnotationStore, UserPositions},
};
use std::str::FromStr;
use tracing::trace;

/// Decode an annotation document.
pub fn decode(bytes: &[u8]) -> Result<AnnotationStore, Error> {
    let root = tree::parse(bytes)?;
    if root.name != ROOT {
        return Err(Error::UnexpectedElement {
            expected: ROOT,
            found: root.name,
        });
    }

    let is_3d = parse_bool(
        root.attribute(IS_3D_ATTRIBUTE)
            .ok_or(Error::MissingAttribute(IS_3D_ATTRIBUTE))?,
    )?;

    let mut store = AnnotationStore::new(is_3d);
    for annotation in root.children_named(ANNOTATION) {
        let (frame, users) = decode_annotation(annotation, is_3d)?;
        trace!(message = "decoded annotation", frame, users = users.len());
        store.add(frame, users)?;
    }
    Ok(store)
}

fn decode_annotation(annotation: &Element, is_3d: bool) -> Result<(u32, UserPositions), Error> {
    let key = annotation
        .children
        .first()
        .ok_or(Error::MissingElement(FRAME_NUMBER))?;

    let frame = match key.name.as_str() {
        FRAME_NUMBER => parse_number(FRAME_NUMBER, &key.text)?,
        IMAGE => {
            let name = key.child(NAME).ok_or(Error::MissingElement(NAME))?;
            frame_from_file_name(name.text.trim())?
        }
        _ => {
            return Err(Error::UnexpectedElement {
                expected: FRAME_NUMBER,
                found: key.name.clone(),
            })
        }
    };

    let mut users = UserPositions::new();
    for rect in annotation.children_named(ANNORECT) {
        let user = parse_number(
            USER_ID_ATTRIBUTE,
            rect.attribute(USER_ID_ATTRIBUTE)
                .ok_or(Error::MissingAttribute(USER_ID_ATTRIBUTE))?,
        )?;
        // legacy files carry x1/y1/x2/y2 siblings next to the points
        let skeleton = match rect.child(ANNOPOINTS) {
            Some(points) => decode_points(points, is_3d)?,
            None => SkeletonFrame::new(is_3d),
        };
        users.insert(user, skeleton);
    }
    Ok((frame, users))
}

/// Decode a joint list. The first point decides between 2D and 3D, every
/// other point and the containing store must agree.
pub(super) fn decode_points(points: &Element, store_is_3d: bool) -> Result<SkeletonFrame, Error> {
    let mut skeleton: Option<SkeletonFrame> = None;

    for point in points.children_named(POINT) {
        if point.is_empty() {
            continue;
        }

        let id = point.child(ID).ok_or(Error::MissingElement(ID))?;
        let id = parse_number::<i64>(ID, &id.text)?;
        let confidence = point
            .child(CONFIDENCE)
            .map(|confidence| parse_float(CONFIDENCE, &confidence.text))
            .transpose()?
            .unwrap_or_default();
        let x = parse_float(X, &point.child(X).ok_or(Error::MissingElement(X))?.text)?;
        let y = parse_float(Y, &point.child(Y).ok_or(Error::MissingElement(Y))?.text)?;
        let z = point
            .child(Z)
            .map(|z| parse_float(Z, &z.text))
            .transpose()?;

        let skeleton = skeleton.get_or_insert_with(|| SkeletonFrame::new(z.is_some()));
        if skeleton.is_3d() != z.is_some() {
            return Err(Error::InconsistentDimensions);
        }

        let joint = match u8::try_from(id).ok().and_then(Joint::from_export_id) {
            Some(joint) => joint,
            None => {
                trace!(message = "dropping point with unknown joint id", id);
                continue;
            }
        };

        let position = match z {
            Some(z) => JointPosition::spatial(x, y, z, confidence),
            None => JointPosition::planar(x, y, confidence),
        };
        skeleton.insert(joint, position)?;
    }

    match skeleton {
        Some(skeleton) if skeleton.is_3d() != store_is_3d => Err(Error::InconsistentDimensions),
        Some(skeleton) => Ok(skeleton),
        None => Ok(SkeletonFrame::new(store_is_3d)),
    }
}

/// Recover the frame number from an exported file reference such as
/// `/some/dir/042-sb.png` or `C:\some\dir\042-sb.png`.
pub fn frame_from_file_name(reference: &str) -> Result<u32, Error> {
    let file_name = reference.rsplit(&['/', '\\'][..]).next().unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default();
    let number = stem.split('-').next().unwrap_or_default();

    number
        .parse()
        .map_err(|_| Error::FrameFromFileName(reference.to_owned()))
}

fn parse_bool(value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::ParseBool(value.to_owned())),
    }
}

fn parse_number<T>(field: &'static str, value: &str) -> Result<T, Error>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    value.trim().parse().map_err(|source| Error::ParseInt {
        field,
        value: value.to_owned(),
        source,
    })
}

fn parse_float(field: &'static str, value: &str) -> Result<f32, Error> {
    value.trim().parse().map_err(|source| Error::ParseFloat {
        field,
        value: value.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::{decode, frame_from_file_name};
    use crate::joint::Joint;

    #[test]
    fn file_references() {
        assert_eq!(frame_from_file_name("042.png").unwrap(), 42);
        assert_eq!(frame_from_file_name("/tmp/Export-3/007-sb.png").unwrap(), 7);
        assert_eq!(frame_from_file_name("12-l.tar.gz").unwrap(), 12);
        assert!(frame_from_file_name("frame.png").is_err());
        assert!(frame_from_file_name("/tmp/Export-3/").is_err());
    }

    #[test]
    fn windows_file_references() {
        assert_eq!(
            frame_from_file_name(r"C:\data\Export-1\012-s.png").unwrap(),
            12
        );
        assert_eq!(frame_from_file_name(r"..\Export-2\3.png").unwrap(), 3);
        assert!(frame_from_file_name(r"C:\data\Export-1\").is_err());
    }

    #[test]
    fn legacy_rectangles_are_skipped() {
        let store = decode(
            br#"<annotationlist Is3DData="False">
                <annotation>
                    <image><name>003.png</name></image>
                    <annorect UserID="2">
                        <annopoints>
                            <point><id>13</id><confidence>1.0</confidence><x>10</x><y>20</y></point>
                        </annopoints>
                        <x1>0</x1><y1>0</y1><x2>5</x2><y2>5</y2>
                    </annorect>
                </annotation>
            </annotationlist>"#,
        )
        .unwrap();

        let head = store.user(3, 2).unwrap().get(Joint::Head).unwrap();
        assert_eq!(head.position.x(), 10.0);
        assert_eq!(head.position.y(), 20.0);
    }

    #[test]
    fn unknown_joint_ids_are_dropped() {
        let store = decode(
            br#"<annotationlist Is3DData="false">
                <annotation>
                    <frame-number>1</frame-number>
                    <annorect UserID="1">
                        <annopoints>
                            <point><id>99</id><confidence>1.0</confidence><x>1</x><y>2</y></point>
                            <point><id>12</id><confidence>0.5</confidence><x>3</x><y>4</y></point>
                        </annopoints>
                    </annorect>
                </annotation>
            </annotationlist>"#,
        )
        .unwrap();

        let skeleton = store.user(1, 1).unwrap();
        assert_eq!(skeleton.len(), 1);
        assert!(skeleton.contains(Joint::Neck));
    }

    #[test]
    fn mixed_dimensions_fail() {
        let result = decode(
            br#"<annotationlist Is3DData="True">
                <annotation>
                    <frame-number>1</frame-number>
                    <annorect UserID="1">
                        <annopoints>
                            <point><id>12</id><confidence>1.0</confidence><x>1</x><y>2</y><z>3</z></point>
                            <point><id>13</id><confidence>1.0</confidence><x>1</x><y>2</y></point>
                        </annopoints>
                    </annorect>
                </annotation>
            </annotationlist>"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn points_must_match_store() {
        let result = decode(
            br#"<annotationlist Is3DData="True">
                <annotation>
                    <frame-number>1</frame-number>
                    <annorect UserID="1">
                        <annopoints>
                            <point><id>12</id><confidence>1.0</confidence><x>1</x><y>2</y></point>
                        </annopoints>
                    </annorect>
                </annotation>
            </annotationlist>"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn malformed_user_id_fails() {
        let result = decode(
            br#"<annotationlist Is3DData="False">
                <annotation>
                    <frame-number>1</frame-number>
                    <annorect UserID="first"><annopoints/></annorect>
                </annotation>
            </annotationlist>"#,
        );
        assert!(result.is_err());
    }
}
