use super::{
    ANNOTATION, ANNOPOINTS, ANNORECT, CONFIDENCE, FRAME_NUMBER, ID, IMAGE, IS_3D_ATTRIBUTE, NAME,
    POINT, ROOT, USER_ID_ATTRIBUTE, X, Y, Z,
};
use crate::{
    error::Error,
    export::{frame_number_width, image_file_name},
    skeleton::SkeletonFrame,
    store::AnnotationStore,
};
use quick_xml::{
    events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

/// How each `<annotation>` names its frame.
#[derive(Debug, Clone, Copy)]
pub enum FrameKey<'a> {
    /// `<frame-number>` with the literal frame number.
    Number,
    /// `<image><name>` with the exported image path built from the frame
    /// number, zero padded to the widest selected frame.
    Filename { prefix: &'a Path, suffix: &'a str },
    /// `<image><name>` with an explicit file per frame.
    Files(&'a BTreeMap<u32, String>),
}

#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions<'a> {
    pub key: FrameKey<'a>,
    /// Restrict the document to these frames.
    pub frames: Option<&'a BTreeSet<u32>>,
    /// Write only the frame keys, without any user data.
    pub omit_points: bool,
}

impl Default for EncodeOptions<'_> {
    fn default() -> Self {
        Self {
            key: FrameKey::Number,
            frames: None,
            omit_points: false,
        }
    }
}

type XmlWriter = Writer<Vec<u8>>;

/// Encode an annotation store as an XML document.
pub fn encode(store: &AnnotationStore, options: &EncodeOptions<'_>) -> Result<Vec<u8>, Error> {
    let frames = store
        .iter()
        .filter(|(frame, _)| options.frames.map_or(true, |wanted| wanted.contains(frame)))
        .collect::<Vec<_>>();
    let width = frame_number_width(frames.last().map_or(0, |(&frame, _)| frame));

    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    write(
        &mut writer,
        Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)),
    )?;
    write(
        &mut writer,
        Event::Start(
            BytesStart::new(ROOT).with_attributes([(IS_3D_ATTRIBUTE, bool_text(store.is_3d()))]),
        ),
    )?;

    for (&frame, users) in frames {
        write(&mut writer, Event::Start(BytesStart::new(ANNOTATION)))?;

        match options.key {
            FrameKey::Number => text_element(&mut writer, FRAME_NUMBER, &frame.to_string())?,
            FrameKey::Filename { prefix, suffix } => {
                let name = prefix.join(image_file_name(frame, width, suffix));
                image_name(&mut writer, &name.to_string_lossy())?;
            }
            FrameKey::Files(files) => {
                let name = files.get(&frame).ok_or(Error::MissingFileName(frame))?;
                image_name(&mut writer, name)?;
            }
        }

        if !options.omit_points {
            for (user, skeleton) in users {
                let user = user.to_string();
                write(
                    &mut writer,
                    Event::Start(
                        BytesStart::new(ANNORECT)
                            .with_attributes([(USER_ID_ATTRIBUTE, user.as_str())]),
                    ),
                )?;
                encode_points(&mut writer, skeleton)?;
                write(&mut writer, Event::End(BytesEnd::new(ANNORECT)))?;
            }
        }

        write(&mut writer, Event::End(BytesEnd::new(ANNOTATION)))?;
    }

    write(&mut writer, Event::End(BytesEnd::new(ROOT)))?;
    Ok(writer.into_inner())
}

fn encode_points(writer: &mut XmlWriter, skeleton: &SkeletonFrame) -> Result<(), Error> {
    write(writer, Event::Start(BytesStart::new(ANNOPOINTS)))?;
    for (joint, position) in skeleton.iter() {
        write(writer, Event::Start(BytesStart::new(POINT)))?;
        text_element(writer, ID, &joint.export_id().to_string())?;
        text_element(writer, CONFIDENCE, &one_decimal(position.confidence))?;
        text_element(writer, X, &position.position.x().to_string())?;
        text_element(writer, Y, &position.position.y().to_string())?;
        if let Some(z) = position.position.z() {
            text_element(writer, Z, &z.to_string())?;
        }
        write(writer, Event::End(BytesEnd::new(POINT)))?;
    }
    write(writer, Event::End(BytesEnd::new(ANNOPOINTS)))
}

/// Ties round away from zero, `0.25` is written as `0.3`.
fn one_decimal(value: f32) -> String {
    format!("{:.1}", (f64::from(value) * 10.0).round() / 10.0)
}

fn image_name(writer: &mut XmlWriter, name: &str) -> Result<(), Error> {
    write(writer, Event::Start(BytesStart::new(IMAGE)))?;
    text_element(writer, NAME, name)?;
    write(writer, Event::End(BytesEnd::new(IMAGE)))
}

fn text_element(writer: &mut XmlWriter, name: &str, text: &str) -> Result<(), Error> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

fn write(writer: &mut XmlWriter, event: Event<'_>) -> Result<(), Error> {
    writer.write_event(event).map_err(Error::WriteXml)
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}
